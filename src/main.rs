//! midiframe - inspect, slice and merge Standard MIDI Files.
//!
//! # Usage
//!
//! ```bash
//! midiframe info song.mid other.mid           # summary of each file
//! midiframe sustain song.mid --threshold 64   # pedal intervals and extended notes
//! midiframe piece song.mid --start 10 --finish 20 --output part.json
//! midiframe merge out.mid a.mid b.mid --space 2.5
//! ```
//!
//! Set `RUST_LOG=debug` to see decoder diagnostics on stderr.

use anyhow::{bail, Context, Result};
use midiframe::midi::{
    decode_many, key_number_to_key_name, note_number_to_name, sustain_intervals, LoadOptions,
    MidiFile, SliceType,
};
use std::path::{Path, PathBuf};

/// What the binary was asked to do.
enum Command {
    /// Print a summary of each file.
    Info { files: Vec<PathBuf> },
    /// Print pedal intervals and how many notes the pedal extends.
    Sustain { file: PathBuf },
    /// Export the note table (optionally trimmed) as JSON.
    Piece {
        file: PathBuf,
        range: Option<(f64, f64)>,
        slice_type: SliceType,
        output: Option<PathBuf>,
    },
    /// Concatenate files into one MIDI file.
    Merge {
        output: PathBuf,
        files: Vec<PathBuf>,
        space: f64,
    },
}

/// Command-line options for the application.
struct CliOptions {
    command: Command,
    /// Sustain handling applied when loading files.
    load: LoadOptions,
}

fn print_help(program: &str) {
    eprintln!("midiframe - Standard MIDI File codec tool");
    eprintln!();
    eprintln!("Usage: {} <COMMAND> [OPTIONS]", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  info FILE...              Print a summary of each file");
    eprintln!("  sustain FILE              Print sustain pedal intervals");
    eprintln!("  piece FILE                Write the note table as JSON");
    eprintln!("  merge OUTPUT FILE...      Concatenate files into OUTPUT");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -t, --threshold N         Sustain pedal threshold (default 62)");
    eprintln!("      --no-sustain          Do not extend notes with the sustain pedal");
    eprintln!("      --start S --finish F  Trim the piece to [S, F]");
    eprintln!("      --slice-type TYPE     standard, by_end or index (default standard)");
    eprintln!("  -o, --output PATH         Where to write the piece JSON");
    eprintln!("      --space SECONDS       Gap inserted between merged files");
    eprintln!("  -h, --help                Print this help message");
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("midiframe");

        let mut load = LoadOptions::default();
        let mut positional: Vec<String> = Vec::new();
        let mut start: Option<f64> = None;
        let mut finish: Option<f64> = None;
        let mut slice_type = SliceType::default();
        let mut output: Option<PathBuf> = None;
        let mut space = 0.0;
        let mut i = 1;

        let value = |i: usize, flag: &str| -> Result<String> {
            args.get(i)
                .cloned()
                .with_context(|| format!("{} requires a value", flag))
        };

        while i < args.len() {
            match args[i].as_str() {
                "--threshold" | "-t" => {
                    i += 1;
                    load.sustain_threshold = value(i, "--threshold")?
                        .parse()
                        .context("--threshold must be between 0 and 127")?;
                }
                "--no-sustain" => load.apply_sustain = false,
                "--start" => {
                    i += 1;
                    start = Some(value(i, "--start")?.parse().context("invalid --start")?);
                }
                "--finish" => {
                    i += 1;
                    finish = Some(value(i, "--finish")?.parse().context("invalid --finish")?);
                }
                "--slice-type" => {
                    i += 1;
                    slice_type = value(i, "--slice-type")?.parse()?;
                }
                "--output" | "-o" => {
                    i += 1;
                    output = Some(PathBuf::from(value(i, "--output")?));
                }
                "--space" => {
                    i += 1;
                    space = value(i, "--space")?.parse().context("invalid --space")?;
                }
                "--help" | "-h" => {
                    print_help(program);
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                other => positional.push(other.to_string()),
            }
            i += 1;
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            Some("info") => Command::Info {
                files: positional.map(PathBuf::from).collect(),
            },
            Some("sustain") => Command::Sustain {
                file: positional.next().map(PathBuf::from).context("sustain needs a FILE")?,
            },
            Some("piece") => {
                let range = match (start, finish) {
                    (Some(start), Some(finish)) => Some((start, finish)),
                    (None, None) => None,
                    _ => bail!("--start and --finish must be given together"),
                };
                Command::Piece {
                    file: positional.next().map(PathBuf::from).context("piece needs a FILE")?,
                    range,
                    slice_type,
                    output,
                }
            }
            Some("merge") => Command::Merge {
                output: positional.next().map(PathBuf::from).context("merge needs an OUTPUT")?,
                files: positional.map(PathBuf::from).collect(),
                space,
            },
            Some(other) => bail!("unknown command '{}', use --help for usage", other),
            None => {
                print_help(program);
                std::process::exit(1);
            }
        };

        Ok(Self { command, load })
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Info { files } => run_info(&files, cli.load),
        Command::Sustain { file } => run_sustain(&file, cli.load),
        Command::Piece {
            file,
            range,
            slice_type,
            output,
        } => run_piece(&file, cli.load, range, slice_type, output),
        Command::Merge {
            output,
            files,
            space,
        } => run_merge(&output, &files, space, cli.load),
    }
}

fn run_info(files: &[PathBuf], load: LoadOptions) -> Result<()> {
    if files.is_empty() {
        bail!("info needs at least one FILE");
    }

    let mut failures = 0;
    for (path, result) in files.iter().zip(decode_many(files, load)) {
        let file = match result {
            Ok(file) => file,
            Err(e) => {
                println!("{}: error: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };

        let score = file.score();
        let (_, tempi) = score.tempo_changes();
        println!("{}", path.display());
        println!("  resolution:   {} ticks per beat", score.resolution());
        println!("  duration:     {:.3} s", file.duration());
        println!(
            "  tempo:        {:.2} BPM ({} changes)",
            tempi.first().copied().unwrap_or_default(),
            tempi.len().saturating_sub(1)
        );
        for ts in &score.time_signatures {
            println!("  time sig:     {}", ts);
        }
        for ks in &score.key_signatures {
            println!("  key sig:      {}", ks);
        }
        for (n, instrument) in score.instruments.iter().enumerate() {
            let lowest = instrument.notes.iter().map(|note| note.pitch).min();
            let highest = instrument.notes.iter().map(|note| note.pitch).max();
            let range = match (lowest, highest) {
                (Some(lo), Some(hi)) => {
                    format!("{}-{}", note_number_to_name(lo), note_number_to_name(hi))
                }
                _ => "-".to_string(),
            };
            println!(
                "  instrument {}: program {:3} {} notes {:6} cc {:5} range {} {}",
                n,
                instrument.program,
                if instrument.is_drum { "drum" } else { "    " },
                instrument.note_count(),
                instrument.control_changes.len(),
                range,
                instrument.name
            );
        }
    }

    if failures > 0 {
        bail!("{} of {} files failed to decode", failures, files.len());
    }
    Ok(())
}

fn run_sustain(path: &Path, load: LoadOptions) -> Result<()> {
    let file = MidiFile::from_path(path, load)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let intervals = sustain_intervals(file.sustain(), load.sustain_threshold);
    println!("{} pedal intervals (threshold {})", intervals.len(), load.sustain_threshold);
    for (down, up) in &intervals {
        println!("  {:9.3} - {:9.3}", down, up);
    }

    let extended = file
        .raw_notes()
        .iter()
        .zip(file.notes())
        .filter(|(raw, sustained)| sustained.end > raw.end)
        .count();
    println!("{} of {} notes extended", extended, file.raw_notes().len());
    if let Some(ks) = file.score().key_signatures.first() {
        println!("key: {}", key_number_to_key_name(ks.key_number)?);
    }
    Ok(())
}

fn run_piece(
    path: &Path,
    load: LoadOptions,
    range: Option<(f64, f64)>,
    slice_type: SliceType,
    output: Option<PathBuf>,
) -> Result<()> {
    let file = MidiFile::from_path(path, load)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let mut piece = file.piece();
    if let Some((start, finish)) = range {
        piece = piece
            .trim(start, finish, true, slice_type)
            .context("Failed to trim piece")?;
    }

    match output {
        Some(output) => {
            piece
                .save_to_file(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            eprintln!("Wrote {} notes to {}", piece.size(), output.display());
        }
        None => println!("{}", piece.to_json()?),
    }
    Ok(())
}

fn run_merge(output: &Path, files: &[PathBuf], space: f64, load: LoadOptions) -> Result<()> {
    if files.is_empty() {
        bail!("merge needs at least one FILE");
    }

    let decoded = decode_many(files, load)
        .into_iter()
        .zip(files)
        .map(|(result, path)| result.with_context(|| format!("Failed to load {}", path.display())))
        .collect::<Result<Vec<MidiFile>>>()?;

    let merged = MidiFile::merge(&decoded, space);
    merged
        .write(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    eprintln!(
        "Merged {} files ({} notes, {:.3} s) into {}",
        decoded.len(),
        merged.raw_notes().len(),
        merged.duration(),
        output.display()
    );
    Ok(())
}
