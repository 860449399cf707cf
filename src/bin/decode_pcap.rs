use bacnet_analysis::dump::{describe, describe_packet, format_timestamp, layer_name};
use bacnet_analysis::{deepest_packets, packets, CaptureReader, DecodeOptions, Pipeline};
use std::io::Write;
use std::path::{Path, PathBuf};

const USAGE: &str = "usage: decode_pcap [--full] [--route-aware] [--verbose|-v] FILE...";

/// Remove a boolean flag (any of `names`) from the argument list.
fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

#[derive(Default)]
struct Summary {
    read: u64,
    yielded: u64,
    empty: u64,
    faulted: u64,
}

fn decode_file(
    path: &Path,
    pipeline: Pipeline,
    full: bool,
    out: &mut dyn Write,
) -> anyhow::Result<Summary> {
    let reader = CaptureReader::open(path)?;
    let mut summary = Summary::default();

    if full {
        let mut stream = packets(reader.records(), pipeline);
        for pkt in stream.by_ref() {
            summary.yielded += 1;
            writeln!(out, "{} #{}", format_timestamp(pkt.timestamp()), pkt.number())?;
            for line in describe_packet(&pkt) {
                writeln!(out, "    {}", line)?;
            }
        }
        summary.read = stream.records_read();
        summary.empty = stream.records_empty();
        summary.faulted = stream.records_faulted();
    } else {
        let mut stream = deepest_packets(reader.records(), pipeline);
        for pkt in stream.by_ref() {
            summary.yielded += 1;
            let layer = pkt.layer.view();
            writeln!(
                out,
                "{} #{} {} {}",
                format_timestamp(pkt.timestamp),
                pkt.number,
                layer.name(),
                layer_name(layer)
            )?;
            for line in describe(layer) {
                writeln!(out, "    {}", line)?;
            }
        }
        summary.read = stream.records_read();
        summary.empty = stream.records_empty();
        summary.faulted = stream.records_faulted();
    }
    Ok(summary)
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut args, &["--verbose", "-v"]);
    let full = take_flag(&mut args, &["--full"]);
    let route_aware = take_flag(&mut args, &["--route-aware"]);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "warn" }),
    )
    .init();

    if let Some(unknown) = args.iter().find(|a| a.starts_with('-')) {
        anyhow::bail!("unknown option {}\n{}", unknown, USAGE);
    }
    if args.is_empty() {
        anyhow::bail!(USAGE);
    }

    let pipeline = Pipeline::new(DecodeOptions { route_aware });
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for path in args.into_iter().map(PathBuf::from) {
        log::info!("decoding {}", path.display());
        let s = decode_file(&path, pipeline, full, &mut out)?;
        eprintln!(
            "{}: records read: {}, packets: {}, skipped: {} ({} empty, {} faulted)",
            path.display(),
            s.read,
            s.yielded,
            s.empty + s.faulted,
            s.empty,
            s.faulted
        );
    }
    Ok(())
}
