//! End-to-end persistence: build a hierarchy, save, remount the same image,
//! and verify structure, metadata, and file contents survive byte-for-byte.

use sfs_core::{FLOUDS_MAGIC, FilesystemManager, FloudsHeader};
use sfs_types::{S_IFDIR, S_IFREG};

#[test]
fn mount_save_remount_reproduces_the_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("fs.img");

    {
        let mut fs = FilesystemManager::mount(&image).expect("fresh mount");
        let folder1 = fs
            .add_node(0, b"folder1", true, S_IFDIR | 0o755)
            .expect("mkdir folder1");
        let folder2 = fs
            .add_node(folder1, b"folder2", true, S_IFDIR | 0o700)
            .expect("mkdir folder2");
        let file = fs
            .add_node(folder2, b"file", false, S_IFREG | 0o644)
            .expect("create file");
        fs.write_file(file, 0, b"abc").expect("write");
        fs.unmount().expect("unmount");
    }

    let fs = FilesystemManager::mount(&image).expect("remount");
    assert_eq!(fs.tree().len(), 4);

    let file = fs.tree().resolve_path("/folder1/folder2/file").expect("path");
    assert!(fs.tree().is_file(file).expect("kind"));
    assert_eq!(fs.read_file(file, 0, 16).expect("read"), b"abc");

    let inode = fs.inode(file).expect("inode");
    assert_eq!(inode.size, 3);
    assert_eq!(inode.mode, S_IFREG | 0o644);
    assert!(inode.mtime > 0);

    let folder2 = fs.tree().resolve_path("/folder1/folder2").expect("path");
    assert_eq!(fs.inode(folder2).expect("inode").mode, S_IFDIR | 0o700);
    assert!(fs.tree().is_folder(folder2).expect("kind"));

    assert!(fs.tree().resolve_path("/folder1/missing").is_err());
}

#[test]
fn remount_after_mutations_and_second_save() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("fs.img");

    {
        let mut fs = FilesystemManager::mount(&image).expect("fresh mount");
        for i in 0..20 {
            let name = format!("file{i}");
            let v = fs
                .add_node(0, name.as_bytes(), false, S_IFREG | 0o644)
                .expect("create");
            fs.write_file(v, 0, name.as_bytes()).expect("write");
        }
        fs.save().expect("first save");

        // Mutate after the first save: remove a file, grow another.
        let victim = fs.tree().resolve_path("/file3").expect("path");
        fs.remove_node(victim).expect("unlink");
        let grown = fs.tree().resolve_path("/file7").expect("path");
        fs.write_file(grown, 4096, b"tail").expect("extend");
        fs.unmount().expect("unmount");
    }

    let fs = FilesystemManager::mount(&image).expect("remount");
    assert_eq!(fs.tree().children_count(0).expect("count"), 19);
    assert!(fs.tree().resolve_path("/file3").is_err());

    let grown = fs.tree().resolve_path("/file7").expect("path");
    assert_eq!(fs.inode(grown).expect("inode").size, 4100);
    let data = fs.read_file(grown, 0, 8192).expect("read");
    assert_eq!(&data[..5], b"file7");
    assert!(data[5..4096].iter().all(|b| *b == 0));
    assert_eq!(&data[4096..], b"tail");

    for i in [0, 1, 2, 4, 19] {
        let name = format!("file{i}");
        let v = fs
            .tree()
            .resolve_path(&format!("/{name}"))
            .expect("path");
        assert_eq!(fs.read_file(v, 0, 64).expect("read"), name.as_bytes());
    }
}

#[test]
fn on_disk_header_matches_documented_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("fs.img");

    {
        let mut fs = FilesystemManager::mount(&image).expect("mount");
        fs.add_node(0, b"f", false, S_IFREG | 0o644).expect("create");
        fs.unmount().expect("unmount");
    }

    let raw = std::fs::read(&image).expect("read image");
    assert_eq!(&raw[0..6], FLOUDS_MAGIC);

    let header = FloudsHeader::probe(&raw[..4096])
        .expect("probe")
        .expect("present");
    // The bump allocator serializes to exactly its u64 high-water mark.
    assert_eq!(header.allocator.size, 8);
    let alloc_offset = header.allocator.handle.0 as usize * 4096;
    let next_block = u64::from_le_bytes(
        raw[alloc_offset..alloc_offset + 8]
            .try_into()
            .expect("8 bytes"),
    );
    assert!(next_block > header.allocator.handle.0);

    // The tree extent starts with its structure bitvector's u64 bit count.
    let tree_offset = header.tree.handle.0 as usize * 4096;
    let node_count = u64::from_le_bytes(
        raw[tree_offset..tree_offset + 8].try_into().expect("8 bytes"),
    );
    assert_eq!(node_count, 2);

    // The inode extent starts with its u64 record count.
    let inode_offset = header.inodes.handle.0 as usize * 4096;
    let record_count = u64::from_le_bytes(
        raw[inode_offset..inode_offset + 8]
            .try_into()
            .expect("8 bytes"),
    );
    assert_eq!(record_count, 2);
}

#[test]
fn foreign_image_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("fs.img");
    std::fs::write(&image, b"definitely not a FLOUDS image, but long enough")
        .expect("write junk");

    let err = FilesystemManager::mount(&image);
    assert!(err.is_err());
}
