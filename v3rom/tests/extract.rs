// SPDX-License-Identifier: MIT
use std::fs;
use v3rom_testing::{cmdline::exec_cmd_line, fixtures::*};

use v3rom::{app, CliArguments};

fn logo_partition() -> Vec<u8> {
    let mut dump = vec![0x00; 0x100];
    dump.extend([0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);
    dump.resize(0x20000, 0x00);
    dump
}

fn backup() -> Fixture {
    let logo = logo_partition();

    let dumps: Vec<(u8, &[u8])> = vec![
        (0, &b"uboot"[..]),
        (1, &b"ANDROID!"[..]),
        (2, &b"hsqs"[..]),
        (3, &b"jffs2"[..]),
        (4, logo.as_slice()),
        (5, &[0xFF; 64][..]),
        (6, &b"reserved"[..]),
    ];

    Fixture::backup(&dumps)
    .unwrap()
}

#[test]
fn extract_backup_dir() {
    let backup = backup();
    let output = backup.parent_dir().join("extracted");

    #[rustfmt::skip]
    assert!(exec_cmd_line::<CliArguments>(app, vec![
        "v3rom", "extract",
        "--backup", &backup.path().to_string_lossy(),
        "--output", &output.to_string_lossy()
    ])
    .is_ok());

    assert_eq!(fs::read(output.join("uboot.bin")).unwrap(), b"uboot");
    assert_eq!(fs::read(output.join("boot.img")).unwrap(), b"ANDROID!");
    assert_eq!(fs::read(output.join("system.squashfs")).unwrap(), b"hsqs");
    assert_eq!(fs::read(output.join("data.jffs2")).unwrap(), b"jffs2");
    assert_eq!(
        fs::read(output.join("boot_logo.jpg")).unwrap().len(),
        0x20000 - 0x100
    );
    assert_eq!(
        fs::read(output.join("shutdown_logo.raw")).unwrap(),
        vec![0xFF; 64]
    );
    assert_eq!(fs::read(output.join("mtdblock6.raw")).unwrap(), b"reserved");
    assert!(!output.join("squashfs-root").exists());
}

/// Test the default output next to the backup
#[test]
fn extract_default_output() {
    let backup = backup();

    #[rustfmt::skip]
    assert!(exec_cmd_line::<CliArguments>(app, vec![
        "v3rom", "extract",
        "--backup", &backup.path().to_string_lossy()
    ])
    .is_ok());

    let output = backup
        .parent_dir()
        .join("backup_20240101_120000_extracted");
    assert!(output.join("uboot.bin").is_file());
}

/// Test archiving a backup and extracting the archive
#[test]
fn extract_archive() {
    let backup = backup();
    let archive = backup.parent_dir().join("backup.tar.gz");
    let output = backup.parent_dir().join("from_archive");

    #[rustfmt::skip]
    assert!(exec_cmd_line::<CliArguments>(app, vec![
        "v3rom", "archive",
        "--backup", &backup.path().to_string_lossy(),
        "--output", &archive.to_string_lossy()
    ])
    .is_ok());

    #[rustfmt::skip]
    assert!(exec_cmd_line::<CliArguments>(app, vec![
        "v3rom", "extract",
        "--backup", &archive.to_string_lossy(),
        "--output", &output.to_string_lossy()
    ])
    .is_ok());

    assert_eq!(fs::read(output.join("boot.img")).unwrap(), b"ANDROID!");
    assert!(output.join("boot_logo.jpg").is_file());
}

#[test]
fn extract_missing_backup() {
    let backup = Fixture::new("backup_missing");

    #[rustfmt::skip]
    assert!(exec_cmd_line::<CliArguments>(app, vec![
        "v3rom", "extract",
        "--backup", &backup.path().to_string_lossy()
    ])
    .is_err());
}

/// Test that an existing firmware tree is only replaced on request
#[test]
fn unpack_existing_tree() {
    let image = Fixture::with_content("system.squashfs", b"hsqs").unwrap();
    let root = image.parent_dir().join("squashfs-root");
    fs::create_dir_all(&root).unwrap();

    #[rustfmt::skip]
    assert!(exec_cmd_line::<CliArguments>(app, vec![
        "v3rom", "unpack",
        "--image", &image.path().to_string_lossy(),
        "--root", &root.to_string_lossy()
    ])
    .is_err());

    assert!(root.is_dir());
}
