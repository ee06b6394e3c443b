use clap::{Parser, Subcommand};
use sqpack_archive::archive_reader::ArchiveReader;
use sqpack_archive::generator::{ArchiveGenerator, GeneratorOptions};
use sqpack_archive::path_spec::{ArchiveId, PathSpec};
use sqpack_archive::stream::FileStream;
use sqpack_archive::Stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sqpack", version = "1.0.0", about = "SqPack game-client archive CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every entry in an archive
    List {
        dir: PathBuf,
        category: String,
        #[arg(default_value = "0")]
        expac: u8,
        #[arg(default_value = "0")]
        part: u8,
    },
    /// Extract one entry by its in-game path
    Extract {
        dir: PathBuf,
        category: String,
        #[arg(default_value = "0")]
        expac: u8,
        #[arg(default_value = "0")]
        part: u8,
        path: String,
        output: PathBuf,
    },
    /// Print archive-level statistics
    Stat {
        dir: PathBuf,
        category: String,
        #[arg(default_value = "0")]
        expac: u8,
        #[arg(default_value = "0")]
        part: u8,
    },
    /// Pack a set of files into a fresh archive
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        category: String,
        #[arg(default_value = "0")]
        expac: u8,
        #[arg(default_value = "0")]
        part: u8,
        /// REAL_PATH:LOGICAL_PATH pairs, e.g. ./root.exl:exd/root.exl
        #[arg(required = true, num_args = 1..)]
        input: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::try_init().ok();

    match Cli::parse().command {
        Commands::List { dir, category, expac, part } => {
            let id = category_id(&category, expac, part);
            let reader = open_archive(&dir, id)?;
            println!("{:<50} {:>10} {:>4} (dat,off)", "Path", "Alloc", "Dat");
            for entry in reader.entries() {
                println!(
                    "{:<50} {:>10} {:>4} @{}",
                    entry.path_spec.display_name(),
                    entry.allocation,
                    entry.locator.dat_file_index(),
                    entry.locator.offset(),
                );
            }
        }

        Commands::Extract { dir, category, expac, part, path, output } => {
            let id = category_id(&category, expac, part);
            let reader = open_archive(&dir, id)?;
            let spec = PathSpec::parse(&path);
            let mut unpacker = reader.at(&spec)?;
            let mut data = vec![0u8; unpacker.decompressed_size() as usize];
            unpacker.read_exact_at(0, &mut data)?;
            std::fs::write(&output, &data)?;
            println!("Extracted {} ({} B) -> {}", path, data.len(), output.display());
        }

        Commands::Stat { dir, category, expac, part } => {
            let id = category_id(&category, expac, part);
            let reader = open_archive(&dir, id)?;
            println!("Archive {:06x}", id.packed_id());
            println!("  entries: {}", reader.entries().len());
        }

        Commands::Pack { output, category, expac, part, input } => {
            let id = category_id(&category, expac, part);
            let mut gen = ArchiveGenerator::new(id, GeneratorOptions::default());
            for pair in &input {
                let (real, logical) = pair.split_once(':').ok_or_else(|| {
                    format!("expected REAL_PATH:LOGICAL_PATH, got '{pair}'")
                })?;
                let data = std::fs::read(real)?;
                gen.add_compressed(PathSpec::parse(logical), &data)?;
                println!("  packed  {real} -> {logical} ({} B)", data.len());
            }
            gen.export_to_files(&output)?;
            println!("Created archive {:06x} -> {}", id.packed_id(), output.display());
        }
    }

    Ok(())
}

fn category_id(name: &str, expac: u8, part: u8) -> ArchiveId {
    let prefix = PathSpec::parse(&format!("{name}/placeholder")).archive_id();
    ArchiveId::new(prefix.category, expac, part)
}

fn open_archive(dir: &Path, id: ArchiveId) -> Result<ArchiveReader, Box<dyn std::error::Error>> {
    let prefix = format!("{:06x}", id.packed_id());
    let index1 = FileStream::open(dir.join(format!("{prefix}.win32.index")))?;
    let index2 = FileStream::open(dir.join(format!("{prefix}.win32.index2")))?;

    let mut dat_streams: Vec<Arc<dyn Stream>> = Vec::new();
    for i in 0.. {
        let path = dir.join(format!("{prefix}.win32.dat{i}"));
        if !path.exists() {
            break;
        }
        dat_streams.push(Arc::new(FileStream::open(path)?));
    }

    Ok(ArchiveReader::open(id, &index1, &index2, dat_streams, true)?)
}
