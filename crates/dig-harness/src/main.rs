#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use dig_harness::{
    FIXTURE_CHUNK, SparseFixture, sample_image, validate_group_desc_fixture,
    validate_superblock_fixture,
};
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("mkimage") => mkimage(&args[1..]),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("check-fixtures") => {
            let tiny = Path::new("conformance/fixtures/ext2_tiny_1k.json");
            let sb = validate_superblock_fixture(tiny)?;
            let gd = validate_group_desc_fixture(tiny)?;
            println!(
                "ext2: block_size={} blocks={} inodes={} volume={}",
                sb.block_size, sb.blocks_count, sb.inodes_count, sb.volume_name
            );
            println!(
                "group 0: block_bitmap={} inode_bitmap={} inode_table={}",
                gd.block_bitmap, gd.inode_bitmap, gd.inode_table
            );
            Ok(())
        }
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn mkimage(args: &[String]) -> Result<()> {
    let out = args.first().context("usage: dig-harness mkimage <out.img>")?;
    let image = sample_image()?;
    fs::write(out, &image).with_context(|| format!("failed to write {out}"))?;
    eprintln!("wrote {} bytes to {out}", image.len());
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    let Some(image_path) = args.first().map(Path::new) else {
        bail!("usage: dig-harness generate-fixture <image> [out.json]");
    };
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let fixture = SparseFixture::from_image(&image_data, FIXTURE_CHUNK);
    let json = serde_json::to_string_pretty(&fixture)?;

    match args.get(1) {
        Some(out) => {
            fs::write(out, format!("{json}\n")).with_context(|| format!("failed to write {out}"))?;
            eprintln!("captured {} write(s) into {out}", fixture.writes.len());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_usage() {
    println!("dig-harness: synthetic images and fixture management for ext2dig");
    println!();
    println!("USAGE:");
    println!("  dig-harness mkimage <out.img>");
    println!("  dig-harness generate-fixture <image> [out.json]");
    println!("  dig-harness check-fixtures");
    println!();
    println!("FIXTURE GENERATION:");
    println!("  Captures every non-zero {FIXTURE_CHUNK}-byte run of an image as a sparse");
    println!("  JSON fixture. Zero runs are omitted and restored on load.");
    println!();
    println!("EXAMPLES:");
    println!("  dig-harness mkimage /tmp/sample.img");
    println!("  dig-harness generate-fixture /tmp/sample.img conformance/fixtures/sample.json");
}
