use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use paperback::config::{Compression, DecodeConfig, EncodeConfig};
use paperback::pipeline::{DecodeDriver, EncodeDriver};
use paperback::render::Raster;

#[derive(Parser)]
#[command(
    name = "paperback",
    version = "1.0.0",
    about = "Paper-robust codec: print any file as scannable dot-grid pages and decode scans back"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file into one .pgm page image per sheet of paper
    Encode {
        input: PathBuf,
        #[arg(short, long)]
        output_dir: PathBuf,
        #[arg(long, default_value_t = 200)]
        dpi: u32,
        #[arg(long, default_value_t = 80)]
        dot_percent: u32,
        #[arg(long, default_value_t = 5)]
        redundancy: u8,
        /// none, fast, or max
        #[arg(long, default_value = "none")]
        compression: String,
        #[arg(long)]
        force_compression: bool,
        #[arg(long)]
        print_border: bool,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Decode a sequence of scanned .pgm pages back into the original file
    Decode {
        #[arg(required = true, num_args = 1..)]
        pages: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
        /// Try every sampling combination and keep the one with fewest
        /// corrections, instead of stopping at the first that verifies.
        #[arg(long)]
        best_quality: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Encode ───────────────────────────────────────────────────────────
        Commands::Encode {
            input,
            output_dir,
            dpi,
            dot_percent,
            redundancy,
            compression,
            force_compression,
            print_border,
            password,
        } => {
            let data = fs::read(&input)?;
            let modified = unix_modified(&input);
            let filename = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file.bin".into());

            let mut cfg = EncodeConfig {
                dpi,
                dot_percent,
                redundancy,
                print_border,
                force_compression,
                compression: parse_compression(&compression),
                ..EncodeConfig::default()
            };
            if let Some(pwd) = password {
                cfg.encryption = true;
                cfg.password = Some(pwd);
            }

            fs::create_dir_all(&output_dir)?;
            let mut driver = EncodeDriver::new(&data, &filename, modified, &cfg)?;
            let total = driver.total_pages();
            while let Some((progress, raster)) = driver.step() {
                let path = output_dir.join(format!("page-{:04}.pgm", progress.page + 1));
                write_pgm(&path, &raster)?;
                println!(
                    "  page {}/{}  {:5.1}%  -> {}",
                    progress.page + 1,
                    total,
                    progress.percent,
                    path.display()
                );
            }
            println!("Encoded {} page(s) -> {}", total, output_dir.display());
        }

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode {
            pages,
            output,
            password,
            best_quality,
        } => {
            let cfg = DecodeConfig { password, best_quality };
            let mut driver = DecodeDriver::new(&cfg);
            let mut recovered = false;

            for path in &pages {
                let raster = read_pgm(path)?;
                println!("  scanning {}", path.display());
                for file in driver.step(&raster)? {
                    fs::write(&output, &file.bytes)?;
                    println!(
                        "Recovered '{}' ({} bytes) -> {}",
                        file.filename,
                        file.bytes.len(),
                        output.display()
                    );
                    recovered = true;
                }
            }

            if !recovered {
                eprintln!("Decode incomplete: not enough pages scanned to reassemble a file.");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────

fn parse_compression(s: &str) -> Compression {
    match s {
        "fast" => Compression::Fast,
        "max" => Compression::Max,
        _ => Compression::None,
    }
}

fn unix_modified(path: &PathBuf) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// Raster pages are written/read as plain binary PGM (P5): the spec keeps
// BMP container I/O external, and PGM round-trips an 8-bit grayscale
// buffer losslessly without pulling in an image crate.

fn write_pgm(path: &PathBuf, raster: &Raster) -> io::Result<()> {
    let mut f = fs::File::create(path)?;
    write!(f, "P5\n{} {}\n255\n", raster.width, raster.height)?;
    f.write_all(&raster.pixels)?;
    Ok(())
}

fn read_pgm(path: &PathBuf) -> io::Result<Raster> {
    let mut f = fs::File::open(path)?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes)?;

    let mut tokens = Vec::new();
    let mut pos = 0;
    while tokens.len() < 4 {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if start == pos {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated PGM header"));
        }
        tokens.push(std::str::from_utf8(&bytes[start..pos]).unwrap_or("").to_owned());
    }
    pos += 1; // single whitespace byte separating header from binary data

    if tokens[0] != "P5" {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a binary PGM (P5) file"));
    }
    let width: u32 = tokens[1]
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad PGM width"))?;
    let height: u32 = tokens[2]
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad PGM height"))?;
    let maxval: u32 = tokens[3]
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad PGM maxval"))?;
    if maxval != 255 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "only 8-bit PGM is supported"));
    }

    let expected = (width as usize) * (height as usize);
    let pixels = bytes[pos..].to_vec();
    if pixels.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("PGM pixel count {} does not match {}x{}", pixels.len(), width, height),
        ));
    }

    Ok(Raster { width, height, pixels })
}
