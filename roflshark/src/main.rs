use anyhow::{Context, anyhow};
use clap::{App, Arg, ArgMatches, SubCommand};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rofl_replays::ReplayFile;
use rofl_replays::analyzer::calibration::{CANDIDATE_ORIGINS, CalibrationSurvey};
use rofl_replays::analyzer::packet_dump::PacketDumpBuilder;
use rofl_replays::analyzer::positions::PositionExtractor;
use rofl_replays::analyzer::survey::{SurveyBuilder, SurveyStats};
use rofl_replays::block::BlockDecoder;
use rofl_replays::config::DecoderConfig;

fn load_config(matches: &ArgMatches) -> anyhow::Result<DecoderConfig> {
    match matches.value_of("CONFIG") {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            toml::from_str(&contents).context("failed to parse config file")
        }
        None => Ok(DecoderConfig::default()),
    }
}

fn parse_packet_ids(matches: &ArgMatches) -> anyhow::Result<Option<Vec<u16>>> {
    let Some(values) = matches.values_of("PACKET_ID") else {
        return Ok(None);
    };
    values
        .map(|v| parse_int::parse::<u16>(v).map_err(|e| anyhow!("invalid packet id {v:?}: {e}")))
        .collect::<anyhow::Result<Vec<_>>>()
        .map(Some)
}

fn load_replay(path: &str) -> anyhow::Result<ReplayFile> {
    ReplayFile::from_file(Path::new(path)).with_context(|| format!("failed to parse {path}"))
}

fn print_meta(replay: &ReplayFile) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&replay.meta)?);
    Ok(())
}

fn print_chunks(replay: &ReplayFile, config: &DecoderConfig) -> anyhow::Result<()> {
    for chunk in replay.chunks(config) {
        let blocks = chunk
            .payload
            .as_deref()
            .map(|p| BlockDecoder::new(p).count())
            .unwrap_or(0);
        println!(
            "{}",
            serde_json::json!({
                "chunk": chunk,
                "payload_len": chunk.payload_len(),
                "blocks": blocks,
            })
        );
    }
    Ok(())
}

fn dump(replay: &ReplayFile, config: &DecoderConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let packet_ids = parse_packet_ids(matches)?;

    if matches.is_present("HEXDUMP") {
        for chunk in replay.chunks(config) {
            let Some(payload) = chunk.payload.as_deref() else {
                continue;
            };
            for block in BlockDecoder::new(payload) {
                if packet_ids.as_ref().is_some_and(|ids| !ids.contains(&block.packet_id)) {
                    continue;
                }
                println!(
                    "chunk {} t={:.3} id={:#06x} param={:#x} len={}",
                    chunk.id, block.timestamp, block.packet_id, block.param, block.length
                );
                for line in hexdump::hexdump_iter(block.payload) {
                    println!("{line}");
                }
            }
        }
        return Ok(());
    }

    let mut builder = PacketDumpBuilder::new().no_meta(matches.is_present("NO_META"));
    if let Some(ids) = packet_ids {
        builder = builder.packet_ids(ids);
    }
    let output: Box<dyn std::io::Write> = match matches.value_of("OUTPUT") {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path).with_context(|| format!("failed to create {path}"))?,
        )),
        None => Box::new(std::io::stdout()),
    };
    let mut analyzer = builder.build(&replay.meta, output);
    replay.for_each_block(config, analyzer.as_mut());
    Ok(())
}

fn replay_paths(input: &str) -> Vec<PathBuf> {
    let path = Path::new(input);
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("rofl"))
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn survey(input: &str, config: &DecoderConfig, top: usize) -> anyhow::Result<()> {
    let stats = Rc::new(RefCell::new(SurveyStats::new()));
    let builder = SurveyBuilder::new(stats.clone());
    let mut failed = 0;

    for path in replay_paths(input) {
        match ReplayFile::from_file(&path) {
            Ok(replay) => {
                info!("surveying {}", path.display());
                let mut analyzer = builder.build(&replay.meta);
                replay.for_each_block(config, analyzer.as_mut());
            }
            Err(e) => {
                warn!("failed to parse {}: {e}", path.display());
                failed += 1;
            }
        }
    }

    let stats = stats.borrow();
    println!(
        "{} replays ({} failed), {} chunks ({} undecompressed), {} blocks",
        stats.replays, failed, stats.total_chunks, stats.passthrough_chunks, stats.total_blocks
    );
    println!("{:>10} {:>10} {:>10}  first payload", "packet id", "count", "avg len");
    for (id, packet) in stats.most_common().into_iter().take(top) {
        println!(
            "{:>#10x} {:>10} {:>10.1}  {}",
            id,
            packet.count,
            packet.average_len(),
            packet
                .samples
                .first()
                .map(|s| s.payload_start.as_str())
                .unwrap_or("")
        );
    }
    Ok(())
}

fn positions(replay: &ReplayFile, config: &DecoderConfig, step: f64) -> anyhow::Result<()> {
    let mut extractor = PositionExtractor::new(config);
    replay.for_each_block(config, &mut extractor);
    let stats = extractor.stats();
    info!(
        chunks = stats.total_chunks,
        blocks = stats.total_blocks,
        candidates = stats.candidates,
        movement_packets = stats.movement_packets,
        out_of_bounds = stats.out_of_bounds,
        entities = extractor.tracker().len(),
        "extracted movement"
    );

    let snapshots = extractor
        .tracker()
        .snapshots(step, replay.meta.game_length_secs());
    let output = serde_json::json!({
        "metadata": replay.meta,
        "players_state": snapshots,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn calibrate(replay: &ReplayFile, config: &DecoderConfig) -> anyhow::Result<()> {
    let mut survey = CalibrationSurvey::new(config, CANDIDATE_ORIGINS);
    replay.for_each_block(config, &mut survey);

    println!("{:>10} {:>10} {:>10} {:>10}  on map", "origin x", "origin y", "tested", "valid");
    for trial in survey.trials() {
        println!(
            "{:>10.1} {:>10.1} {:>10} {:>10}  {:.1}%",
            trial.origin_offset_x,
            trial.origin_offset_y,
            trial.tested,
            trial.on_map,
            trial.valid_rate() * 100.0
        );
    }
    match survey.best() {
        Some(best) => info!(
            origin_offset_x = best.origin_offset_x,
            origin_offset_y = best.origin_offset_y,
            "best origin"
        ),
        None => warn!("no movement packets decoded"),
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let replay_arg = Arg::with_name("REPLAY")
        .help("The replay file to use")
        .required(true)
        .index(1);
    let matches = App::new("roflshark")
        .about("Inspects League of Legends .rofl replay files")
        .arg(
            Arg::with_name("CONFIG")
                .help("Decoder configuration TOML file")
                .short("c")
                .long("config")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("VERBOSE")
                .help("Enable debug logging")
                .short("v")
                .long("verbose")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("meta")
                .about("Prints the replay metadata as JSON")
                .arg(replay_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("chunks")
                .about("Lists the chunk records of the event stream")
                .arg(replay_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("dump")
                .about("Dumps decoded blocks, one JSON object per line")
                .arg(
                    Arg::with_name("PACKET_ID")
                        .help("Only dump blocks with this packet id (e.g. 0x61)")
                        .short("p")
                        .long("packet")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("OUTPUT")
                        .help("Write to this file instead of stdout")
                        .short("o")
                        .long("output")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("NO_META")
                        .help("Don't output the metadata as first line")
                        .long("no-meta"),
                )
                .arg(
                    Arg::with_name("HEXDUMP")
                        .help("Print payloads as a hexdump instead of JSON")
                        .long("hexdump"),
                )
                .arg(replay_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("survey")
                .about("Counts packet ids across a replay or a directory of replays")
                .arg(
                    Arg::with_name("TOP")
                        .help("Number of packet ids to list")
                        .long("top")
                        .takes_value(true)
                        .default_value("20"),
                )
                .arg(
                    Arg::with_name("REPLAYS")
                        .help("A .rofl file or a directory to search")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            SubCommand::with_name("positions")
                .about("Extracts interpolated entity positions as JSON snapshots")
                .arg(
                    Arg::with_name("STEP")
                        .help("Seconds between snapshots")
                        .long("step")
                        .takes_value(true)
                        .default_value("1.0"),
                )
                .arg(replay_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("calibrate")
                .about("Reports how many movement packets land on the map per candidate origin")
                .arg(replay_arg),
        )
        .subcommand(SubCommand::with_name("config").about("Prints the default configuration"))
        .get_matches();

    let verbose = matches.is_present("VERBOSE")
        || matches
            .subcommand()
            .1
            .is_some_and(|sub| sub.is_present("VERBOSE"));
    init_tracing(verbose);

    match matches.subcommand() {
        ("config", Some(_)) => {
            print!("{}", DecoderConfig::generate_default_toml());
            Ok(())
        }
        ("meta", Some(sub)) => print_meta(&load_replay(sub.value_of("REPLAY").unwrap())?),
        ("chunks", Some(sub)) => {
            let config = load_config(sub)?;
            print_chunks(&load_replay(sub.value_of("REPLAY").unwrap())?, &config)
        }
        ("dump", Some(sub)) => {
            let config = load_config(sub)?;
            dump(&load_replay(sub.value_of("REPLAY").unwrap())?, &config, sub)
        }
        ("survey", Some(sub)) => {
            let config = load_config(sub)?;
            let top = sub
                .value_of("TOP")
                .unwrap()
                .parse::<usize>()
                .context("invalid --top")?;
            survey(sub.value_of("REPLAYS").unwrap(), &config, top)
        }
        ("positions", Some(sub)) => {
            let config = load_config(sub)?;
            let step = sub
                .value_of("STEP")
                .unwrap()
                .parse::<f64>()
                .context("invalid --step")?;
            positions(&load_replay(sub.value_of("REPLAY").unwrap())?, &config, step)
        }
        ("calibrate", Some(sub)) => {
            let config = load_config(sub)?;
            calibrate(&load_replay(sub.value_of("REPLAY").unwrap())?, &config)
        }
        _ => Err(anyhow!("no subcommand given, see --help")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_toml_round_trips() {
        let parsed: DecoderConfig = toml::from_str(&DecoderConfig::generate_default_toml()).unwrap();
        assert_eq!(parsed, DecoderConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let parsed: DecoderConfig = toml::from_str(
            "movement_packet_ids = [0x2a]\n[calibration]\norigin_offset_x = 100.0\n",
        )
        .unwrap();
        assert_eq!(parsed.movement_packet_ids, vec![0x2a]);
        assert_eq!(parsed.calibration.origin_offset_x, 100.0);
        assert_eq!(parsed.calibration.scale, 2.0);
        assert_eq!(parsed.calibration.map_max, 15000.0);
        assert_eq!(parsed.jitter_window, 1.0);
    }

    #[test]
    fn packet_ids_accept_hex() {
        let app = App::new("t").arg(
            Arg::with_name("PACKET_ID")
                .long("packet")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        );
        let matches = app.get_matches_from(vec!["t", "--packet", "0x61", "--packet", "100"]);
        assert_eq!(parse_packet_ids(&matches).unwrap(), Some(vec![0x61, 100]));

        let app = App::new("t").arg(Arg::with_name("PACKET_ID").long("packet").takes_value(true));
        let matches = app.get_matches_from(vec!["t", "--packet", "zz"]);
        assert!(parse_packet_ids(&matches).is_err());
    }
}
