use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use framerelay::capture;
use framerelay::codec::read_container;
use framerelay::config::ConfigOverrides;
use framerelay::pipeline::{Collaborators, Transcoder};
use framerelay::utils::platform::RuntimeInfo;
use framerelay::utils::time_utils::format_duration;
use framerelay::utils::{file_utils, logger};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, filter and encode raw video into a container
    Transcode {
        #[command(flatten)]
        overrides: ConfigOverrides,
        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show what a container file holds
    Probe {
        file: PathBuf,
        /// List every packet
        #[arg(short, long, default_value_t = false)]
        packets: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        #[command(flatten)]
        overrides: ConfigOverrides,
        /// Write it as a config file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Detect runtime info
    Detect,
}

fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Transcode { overrides, json } => transcode(&overrides, json),
        Commands::Probe {
            file,
            packets,
            json,
        } => probe(&file, packets, json),
        Commands::Config { overrides, save } => show_config(&overrides, save),
        Commands::Detect => {
            let info = RuntimeInfo::detect()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        logger::error(&format!("{:#}", e));
    }
    result
}

fn transcode(overrides: &ConfigOverrides, json: bool) -> Result<()> {
    let (config, config_path) = overrides.resolve()?;
    if let Some(path) = &config_path {
        logger::info(&format!("using config {}", path.display()));
    }

    let mut source = capture::open_source(&config)?;
    let collaborators = Collaborators::from_config(&config)?;
    let mut transcoder = Transcoder::new(config.clone(), collaborators)?;

    let stop = transcoder.stop_token();
    ctrlc::set_handler(move || {
        stop.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    eprintln!(
        "Transcoding {} -> {} (Ctrl-C to stop)",
        source.describe(),
        config.output
    );
    let report = transcoder.run(source.as_mut())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} frames encoded in {} ({}), {} packets, {} bytes",
            report.frames_encoded,
            format_duration(std::time::Duration::from_millis(report.elapsed_ms)),
            report.stop_cause,
            report.packets_written,
            report.bytes_written
        );
        if report.stage_errors + report.capture_errors > 0 {
            println!(
                "{} capture errors, {} stage errors (see {})",
                report.capture_errors,
                report.stage_errors,
                framerelay::shared::constants::ERROR_LOG_FILE
            );
        }
        if config.output != "-" {
            let size = file_utils::file_size(std::path::Path::new(&config.output))?;
            println!("Wrote {} ({} bytes)", config.output, size);
        }
    }
    Ok(())
}

fn probe(file: &std::path::Path, list_packets: bool, json: bool) -> Result<()> {
    let container = read_container(file)?;
    let header = &container.header;

    if json {
        println!("{}", serde_json::to_string_pretty(header)?);
    } else {
        println!("{}", file.display());
        println!(
            "  {}x{} {} {} @ {} fps, time base {}",
            header.width, header.height, header.layout, header.codec, header.fps, header.time_base
        );
        let payload: usize = container.packets.iter().map(|p| p.data.len()).sum();
        println!("  {} packets, {} payload bytes", container.packets.len(), payload);
        match container.trailer_count {
            Some(count) if container.is_complete() => println!("  trailer ok ({} packets)", count),
            Some(count) => println!("  trailer says {} packets; file is inconsistent", count),
            None => println!("  no trailer: file was cut short"),
        }
    }

    if list_packets {
        for (i, packet) in container.packets.iter().enumerate() {
            println!(
                "{:>6} pts={} dts={} size={}{}",
                i,
                packet.pts,
                packet.dts,
                packet.data.len(),
                if packet.keyframe { " K" } else { "" }
            );
        }
    }
    Ok(())
}

fn show_config(overrides: &ConfigOverrides, save: Option<PathBuf>) -> Result<()> {
    let (config, path) = overrides.resolve()?;
    config.validate()?;

    match &path {
        Some(path) => eprintln!("Loaded {}", path.display()),
        None => eprintln!("No config file found; using defaults"),
    }
    println!("{}", serde_json::to_string_pretty(&config)?);

    if let Some(target) = save {
        config.save(&target)?;
        eprintln!("Saved {}", target.display());
    }
    Ok(())
}
