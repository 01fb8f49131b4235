//! kz – CLI compression tool.
//!
//! Works similar to gzip / zstd:
//!   kz file.txt            → compress to file.txt.knz (removes original)
//!   kz -d file.txt.knz     → decompress to file.txt (removes original)
//!   kz -c file.txt         → compress to stdout
//!   kz -k file.txt         → keep original after compress
//!   kz -l file.txt.knz     → list info about compressed file
//!   cat file | kz -c       → compress stdin to stdout
//!   cat file | kz -dc      → decompress stdin to stdout

use std::env;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode};

use log::{debug, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use kz::entropy;
use kz::stream::{
    CompressedInputStream, CompressedOutputStream, BITSTREAM_TYPE, DEFAULT_BLOCK_SIZE,
    MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
};
use kz::transform;
use kz::KzError;

fn usage() {
    eprintln!("kz - lossless block compression tool");
    eprintln!();
    eprintln!("Usage: kz [OPTIONS] [FILE]...");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --decompress    Decompress mode");
    eprintln!("  -c, --stdout        Write to stdout (don't remove original)");
    eprintln!("  -k, --keep          Keep original file");
    eprintln!("  -f, --force         Overwrite existing output files");
    eprintln!("  -l, --list          List info about compressed file");
    eprintln!("  -t, --transform T   Transform: none, bwt (default), bwts, lz4, snappy, rle");
    eprintln!("  -e, --entropy E     Entropy codec: none, huffman (default), range, paq, fpaq, ans");
    eprintln!("  -b, --block-size N  Block size in bytes, with optional k/m suffix (default 1m)");
    eprintln!("  -x, --checksum      Add a 32-bit checksum to every block");
    eprintln!("  -q, --quiet         Suppress warnings");
    eprintln!("  -v, --verbose       Verbose output (repeat for per-block traces)");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("If no FILE is given, reads from stdin and writes to stdout.");
    eprintln!("Compressed files use the .knz extension.");
}

#[derive(Debug)]
struct Opts {
    decompress: bool,
    to_stdout: bool,
    keep: bool,
    force: bool,
    list: bool,
    checksum: bool,
    verbose: u8,
    quiet: bool,
    transform: u8,
    entropy: u8,
    block_size: usize,
    files: Vec<String>,
}

fn parse_block_size(arg: &str) -> Option<usize> {
    let lower = arg.to_ascii_lowercase();
    let (digits, scale) = match lower.strip_suffix(['k', 'm']) {
        Some(d) if lower.ends_with('k') => (d, 1024),
        Some(d) => (d, 1024 * 1024),
        None => (lower.as_str(), 1),
    };
    digits.parse::<usize>().ok().map(|n| n * scale)
}

fn parse_args() -> Opts {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut opts = Opts {
        decompress: false,
        to_stdout: false,
        keep: false,
        force: false,
        list: false,
        checksum: false,
        verbose: 0,
        quiet: false,
        transform: transform::BWT_TYPE,
        entropy: entropy::HUFFMAN_TYPE,
        block_size: DEFAULT_BLOCK_SIZE,
        files: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-d" | "--decompress" => opts.decompress = true,
            "-c" | "--stdout" | "--to-stdout" => opts.to_stdout = true,
            "-k" | "--keep" => opts.keep = true,
            "-f" | "--force" => opts.force = true,
            "-l" | "--list" => opts.list = true,
            "-x" | "--checksum" => opts.checksum = true,
            "-v" | "--verbose" => opts.verbose += 1,
            "-q" | "--quiet" => opts.quiet = true,
            "-h" | "--help" => {
                usage();
                process::exit(0);
            }
            "-t" | "--transform" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("kz: missing argument for -t");
                    process::exit(1);
                }
                opts.transform = match transform::transform_tag(&args[i]) {
                    Ok(tag) => tag,
                    Err(_) => {
                        eprintln!("kz: unknown transform '{}'", args[i]);
                        eprintln!("kz: valid transforms: none, bwt, bwts, lz4, snappy, rle");
                        process::exit(1);
                    }
                };
            }
            "-e" | "--entropy" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("kz: missing argument for -e");
                    process::exit(1);
                }
                opts.entropy = match entropy::entropy_codec_tag(&args[i]) {
                    Ok(tag) => tag,
                    Err(_) => {
                        eprintln!("kz: unknown entropy codec '{}'", args[i]);
                        eprintln!("kz: valid codecs: none, huffman, range, paq, fpaq, ans");
                        process::exit(1);
                    }
                };
            }
            "-b" | "--block-size" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("kz: missing argument for -b");
                    process::exit(1);
                }
                opts.block_size = match parse_block_size(&args[i]) {
                    Some(n) if (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&n) => n,
                    _ => {
                        eprintln!(
                            "kz: invalid block size '{}' (must be {}..{})",
                            args[i], MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
                        );
                        process::exit(1);
                    }
                };
            }
            // Combined short flags like -dc, -kv.
            s if s.starts_with('-') && !s.starts_with("--") && s.len() > 2 => {
                for ch in s[1..].chars() {
                    match ch {
                        'd' => opts.decompress = true,
                        'c' => opts.to_stdout = true,
                        'k' => opts.keep = true,
                        'f' => opts.force = true,
                        'l' => opts.list = true,
                        'x' => opts.checksum = true,
                        'v' => opts.verbose += 1,
                        'q' => opts.quiet = true,
                        _ => {
                            eprintln!("kz: unknown flag '-{ch}'");
                            process::exit(1);
                        }
                    }
                }
            }
            _ => {
                opts.files.push(arg.clone());
            }
        }
        i += 1;
    }

    opts
}

fn init_logging(opts: &Opts) {
    let level = if opts.quiet {
        LevelFilter::Error
    } else {
        match opts.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    };

    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

fn compress_output_path(input: &str) -> PathBuf {
    PathBuf::from(format!("{input}.knz"))
}

fn decompress_output_path(input: &str) -> Option<PathBuf> {
    let path = Path::new(input);
    match path.extension().and_then(|e| e.to_str()) {
        Some("knz") => Some(path.with_extension("")),
        _ => None,
    }
}

fn compress_stream<R: Read, W: Write>(opts: &Opts, reader: &mut R, sink: W) -> Result<(u64, u64), KzError> {
    let mut out = CompressedOutputStream::new(
        sink,
        opts.transform,
        opts.entropy,
        opts.block_size,
        opts.checksum,
    )?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut read_total = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write(&buf[..n])?;
        read_total += n as u64;
    }

    out.close()?;
    Ok((read_total, out.written()))
}

fn decompress_stream<R: Read, W: Write>(reader: R, writer: &mut W) -> Result<(u64, u64), KzError> {
    let mut input = CompressedInputStream::new(reader)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut written_total = 0u64;

    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        written_total += n as u64;
    }

    let read_total = input.read_bytes();
    input.close()?;
    Ok((read_total, written_total))
}

/// Parse the 80-bit stream header of `data` for -l.
fn list_file(path: &str, data: &[u8]) -> Result<(), String> {
    if data.len() < 10 {
        return Err(format!("{path}: truncated header"));
    }

    let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if magic != BITSTREAM_TYPE {
        return Err(format!("{path}: not a kz stream"));
    }

    let header = u64::from_be_bytes([0, 0, data[4], data[5], data[6], data[7], data[8], data[9]]);
    let version = (header >> 41) & 0x7F;
    let checksum = (header >> 40) & 1 == 1;
    let entropy_tag = ((header >> 33) & 0x7F) as u8;
    let transform_tag = ((header >> 26) & 0x7F) as u8;
    let block_size = header & 0x03FF_FFFF;

    let t_name = transform::transform_name(transform_tag).unwrap_or("?");
    let e_name = entropy::entropy_codec_name(entropy_tag).unwrap_or("?");

    println!(
        "{:>12} v{} {:8} {:8} {:>9} {:>5} {}",
        data.len(),
        version,
        t_name,
        e_name,
        block_size,
        if checksum { "cksum" } else { "-" },
        path,
    );
    Ok(())
}

fn process_compress(opts: &Opts, path: &str) -> Result<(), String> {
    let file = File::open(path).map_err(|e| format!("{path}: {e}"))?;
    let mut reader = BufReader::new(file);

    if opts.to_stdout {
        let stdout = io::stdout();
        compress_stream(opts, &mut reader, stdout.lock()).map_err(|e| format!("{path}: {e}"))?;
        return Ok(());
    }

    let out_path = compress_output_path(path);
    let out_str = out_path.display().to_string();

    if out_path.exists() && !opts.force {
        return Err(format!("{out_str} already exists; use -f to overwrite"));
    }

    let out_file = File::create(&out_path).map_err(|e| format!("{out_str}: {e}"))?;
    let (read, written) = compress_stream(opts, &mut reader, BufWriter::new(out_file))
        .map_err(|e| format!("{path}: {e}"))?;

    debug!("{path}: {read} bytes in, {written} bytes out");

    if opts.verbose > 0 {
        let ratio = if read > 0 {
            written as f64 / read as f64 * 100.0
        } else {
            0.0
        };
        eprintln!("{path}: {ratio:.1}% ({read} → {written} bytes)");
    }

    if !opts.keep {
        fs::remove_file(path).map_err(|e| format!("{path}: cannot remove: {e}"))?;
    }

    Ok(())
}

fn process_decompress(opts: &Opts, path: &str) -> Result<(), String> {
    let file = File::open(path).map_err(|e| format!("{path}: {e}"))?;
    let reader = BufReader::new(file);

    if opts.to_stdout {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        decompress_stream(reader, &mut lock).map_err(|e| format!("{path}: {e}"))?;
        return Ok(());
    }

    let out_path = decompress_output_path(path)
        .ok_or_else(|| format!("{path}: unknown suffix -- ignored"))?;
    let out_str = out_path.display().to_string();

    if out_path.exists() && !opts.force {
        return Err(format!("{out_str} already exists; use -f to overwrite"));
    }

    let out_file = File::create(&out_path).map_err(|e| format!("{out_str}: {e}"))?;
    let mut writer = BufWriter::new(out_file);
    let (read, written) =
        decompress_stream(reader, &mut writer).map_err(|e| format!("{path}: {e}"))?;
    writer.flush().map_err(|e| format!("{out_str}: {e}"))?;

    if opts.verbose > 0 {
        eprintln!("{path}: {read} → {written} bytes");
    }

    if !opts.keep {
        fs::remove_file(path).map_err(|e| format!("{path}: cannot remove: {e}"))?;
    }

    Ok(())
}

fn process_stdin_stdout(opts: &Opts) -> Result<(), String> {
    let stdin = io::stdin();
    let stdout = io::stdout();

    if opts.decompress {
        let mut lock = stdout.lock();
        decompress_stream(stdin.lock(), &mut lock).map_err(|e| format!("stdin: {e}"))?;
    } else {
        let mut input = stdin.lock();
        compress_stream(opts, &mut input, stdout.lock()).map_err(|e| format!("stdin: {e}"))?;
    }

    Ok(())
}

fn run() -> Result<(), ()> {
    let opts = parse_args();
    init_logging(&opts);
    let mut had_error = false;

    if opts.files.is_empty() {
        if opts.list {
            eprintln!("kz: -l requires a file argument");
            return Err(());
        }
        if let Err(e) = process_stdin_stdout(&opts) {
            eprintln!("kz: {e}");
            return Err(());
        }
        return Ok(());
    }

    if opts.list {
        println!(
            "{:>12} {:>2} {:8} {:8} {:>9} {:>5} name",
            "bytes", "v", "xform", "entropy", "blocksize", "check"
        );
        for path in &opts.files {
            match fs::read(path) {
                Ok(data) => {
                    if let Err(e) = list_file(path, &data) {
                        eprintln!("kz: {e}");
                        had_error = true;
                    }
                }
                Err(e) => {
                    eprintln!("kz: {path}: {e}");
                    had_error = true;
                }
            }
        }
        return if had_error { Err(()) } else { Ok(()) };
    }

    for path in &opts.files {
        let result = if opts.decompress {
            process_decompress(&opts, path)
        } else {
            process_compress(&opts, path)
        };

        if let Err(e) = result {
            eprintln!("kz: {e}");
            had_error = true;
        }
    }

    if had_error {
        Err(())
    } else {
        Ok(())
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}
