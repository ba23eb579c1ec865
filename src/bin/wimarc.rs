use clap::{Parser, Subcommand};
use wimarc::codec::CodecId;
use wimarc::orchestrator::{add_image, delete_image, export_image, ImageSelector};
use wimarc::{blob::ForeignHandleId, ingest::ExclusionPatterns, tree, WimArchive};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wimarc", version = "1.0.0", about = "The .wim bootable-image container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show archive-level metadata
    Info { input: PathBuf },
    /// List every image in the archive
    List { input: PathBuf },
    /// Add a new image by ingesting a directory tree
    Add {
        input: PathBuf,
        source: PathBuf,
        name: String,
        /// Mark this as the new boot image
        #[arg(long)]
        boot: bool,
        /// Codec to use when creating a brand-new archive
        #[arg(long, default_value = "lzx")]
        codec: String,
        /// `*`-wildcard exclusion patterns, repeatable
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },
    /// Delete one image, or every image with `all`
    Delete { input: PathBuf, image: String },
    /// Export one image, or every image with `all`, into another archive
    Export {
        src: PathBuf,
        src_image: String,
        dest: PathBuf,
        /// Rename the image in the destination archive (single-image export only)
        #[arg(long)]
        name: Option<String>,
        /// Mark the exported image bootable in the destination archive
        #[arg(long)]
        boot: bool,
        #[arg(long, default_value = "lzx")]
        codec: String,
    },
    /// Recompute every in-archive blob's hash and report mismatches
    Verify { input: PathBuf },
}

fn parse_codec(s: &str) -> CodecId {
    match s.to_ascii_lowercase().as_str() {
        "xpress" => CodecId::Xpress,
        _ => CodecId::Lzx,
    }
}

fn parse_selector(s: &str) -> Result<ImageSelector, Box<dyn std::error::Error>> {
    if s.eq_ignore_ascii_case("all") {
        Ok(ImageSelector::All)
    } else {
        Ok(ImageSelector::Index(s.parse::<usize>()?))
    }
}

fn open_or_create(path: &PathBuf, codec: CodecId) -> Result<WimArchive, Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(WimArchive::open(path)?)
    } else {
        Ok(WimArchive::create(path, codec)?)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Cli::parse().command {
        // ── Info ─────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let archive = WimArchive::open(&input)?;
            let file_size = std::fs::metadata(&input)?.len();
            println!("── .wim Archive ─────────────────────────────────────────");
            println!("  Path          {}", input.display());
            println!("  File size     {} B ({:.2} MiB)", file_size, file_size as f64 / 1048576.0);
            println!("  Codec         {}", archive.codec_id()?.name());
            println!("  Images        {}", archive.catalog.count());
            println!("  Boot index    {}", archive.catalog.boot_index());
            println!("  Blobs         {}", archive.blobs.len());
        }

        // ── List ─────────────────────────────────────────────────────────
        Commands::List { input } => {
            let archive = WimArchive::open(&input)?;
            println!("Archive: {}", input.display());
            println!("{:<4} {:<24} {:>5}  Description", "Idx", "Name", "Boot");
            for i in 1..=archive.catalog.count() {
                let img = archive.catalog.get(i)?;
                let boot = if archive.catalog.boot_index() as usize == i { "*" } else { "" };
                println!(
                    "{:<4} {:<24} {:>5}  {}",
                    i,
                    img.name,
                    boot,
                    img.description.as_deref().unwrap_or("—")
                );
            }
        }

        // ── Add ──────────────────────────────────────────────────────────
        Commands::Add { input, source, name, boot, codec, exclude } => {
            let mut archive = open_or_create(&input, parse_codec(&codec))?;
            let exclusions = ExclusionPatterns::new(exclude);
            let index = add_image(&mut archive, name.clone(), &source, &exclusions, boot)?;
            archive.save()?;
            println!("Added image {index} ({name}) from {}", source.display());
        }

        // ── Delete ───────────────────────────────────────────────────────
        Commands::Delete { input, image } => {
            let mut archive = WimArchive::open(&input)?;
            let selector = parse_selector(&image)?;
            delete_image(&mut archive, selector)?;
            archive.save()?;
            println!("Deleted image {image} from {}", input.display());
        }

        // ── Export ───────────────────────────────────────────────────────
        Commands::Export { src, src_image, dest, name, boot, codec } => {
            let mut src_archive = WimArchive::open(&src)?;
            let mut dest_archive = open_or_create(&dest, parse_codec(&codec))?;
            let selector = parse_selector(&src_image)?;
            let handle = ForeignHandleId(0);

            export_image(&mut src_archive, selector, &mut dest_archive, handle, name, None, boot)?;
            // Resolve the lazy cross-archive references immediately so the
            // destination archive stands alone on disk after `save`.
            dest_archive.resolve_foreign_blobs(&mut src_archive, handle)?;
            dest_archive.save()?;
            println!("Exported {src_image} from {} into {}", src.display(), dest.display());
        }

        // ── Verify ───────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let mut archive = WimArchive::open(&input)?;
            let hashes: Vec<_> = archive.blobs.iter().map(|d| d.hash).collect();
            let mut mismatches = 0;
            for hash in hashes {
                let resource_entry = archive.blobs.lookup(&hash).expect("hash came from this table").resource_entry;
                if !matches!(
                    archive.blobs.lookup(&hash).unwrap().location,
                    wimarc::BlobLocation::InThisArchive
                ) {
                    continue;
                }
                let mut buf = vec![0u8; resource_entry.original_size as usize];
                archive.read_in_this_archive(&resource_entry, 0, resource_entry.original_size, &mut buf, false)?;
                let recomputed = wimarc::Hash::of(&buf);
                if recomputed != hash {
                    println!("MISMATCH: stored {hash} recomputed {recomputed}");
                    mismatches += 1;
                }
            }
            for i in 1..=archive.catalog.count() {
                archive.select_image(i)?;
                let img = archive.catalog.get(i)?;
                tree::walk_stream_refs(&img.root, &mut |h| {
                    if !h.is_empty_stream() && archive.blobs.lookup(&h).is_none() {
                        println!("MISSING: image {i} references blob {h} not present in the blob table");
                        mismatches += 1;
                    }
                });
            }

            if mismatches == 0 {
                println!("OK: {} blob(s) verified across {} image(s)", archive.blobs.len(), archive.catalog.count());
            } else {
                println!("{mismatches} problem(s) found");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
