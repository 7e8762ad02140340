/// Interactive and one-shot console for Atari and Apple disk images

use atrcopy::metadata::{sidecar_path, Metadata};
use atrcopy::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::path::Path;

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "add",
                "comment",
                "create",
                "delete",
                "dir",
                "exit",
                "extract",
                "help",
                "hexdump",
                "info",
                "load-meta",
                "ls",
                "map",
                "open",
                "quit",
                "read-sector",
                "save",
                "save-meta",
                "segments",
                "shred",
                "style",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".atr_history");
        p
    })
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
    args.retain(|a| a != "-v" && a != "--verbose");
    init_logging(verbose);

    if args.is_empty() {
        repl();
        return;
    }

    if let Err(err) = one_shot(&args) {
        eprintln!("Error: {}", err);
        std::process::exit(err.exit_code());
    }
}

/// Run a single command from the command line
fn one_shot(args: &[String]) -> Result<()> {
    let arg = |i: usize| args.get(i).map(String::as_str);
    match (arg(0), arg(1)) {
        (Some("identify"), Some(path)) => {
            println!("{}", ops::identify(path)?);
        }
        (Some("list"), Some(path)) => {
            for dirent in ops::list(path)? {
                println!("{}", dirent);
            }
        }
        (Some("extract"), Some(path)) => {
            let name = arg(2).unwrap_or_else(|| usage("extract <image> <name> [output]"));
            let data = ops::extract(path, name)?;
            let output = arg(3).unwrap_or(name);
            io::write_image(output, &data)?;
            println!("Extracted {} ({} bytes) to {}", name, data.len(), output);
        }
        (Some("add"), Some(path)) => {
            let source = arg(2).unwrap_or_else(|| usage("add <image> <file> [name] [type]"));
            let data = io::read_image(source)?;
            let name = match arg(3) {
                Some(name) => name.to_string(),
                None => host_file_name(source),
            };
            ops::add(path, &name, arg(4).unwrap_or(""), &data)?;
            println!("Added {} ({} bytes)", name, data.len());
        }
        (Some("delete"), Some(path)) => {
            let name = arg(2).unwrap_or_else(|| usage("delete <image> <name>"));
            ops::delete(path, name)?;
            println!("Deleted {}", name);
        }
        _ => usage("atr [-v] [identify|list|extract|add|delete] <image> ..."),
    }
    Ok(())
}

fn usage(text: &str) -> ! {
    eprintln!("Usage: {}", text);
    std::process::exit(1)
}

fn host_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| path.to_uppercase())
}

fn repl() {
    println!("=== atr ===");
    println!("Interactive console for Atari 8-bit and Apple ][ disk images.");
    println!("Type 'help' for available commands\n");

    let mut rl = match Editor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to create editor: {}", e);
            std::process::exit(1);
        }
    };
    rl.set_helper(Some(CommandCompleter::new()));

    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let mut image: Option<Image> = None;

    loop {
        let input = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        let Some(command) = parts.first().map(|c| c.to_lowercase()) else {
            continue;
        };

        match command.as_str() {
            "help" => print_help(),
            "quit" | "exit" => break,
            "open" | "load" => {
                if parts.len() < 2 {
                    println!("Usage: open <path>");
                    continue;
                }
                match Image::open(&parts[1]) {
                    Ok(img) => {
                        println!("Opened: {}", parts[1]);
                        println!("{}", img.describe());
                        image = Some(img);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "create" => {
                let format = match parts.get(1).map(String::as_str) {
                    None | Some("sd") => DiskFormat::AtariDos2Sd,
                    Some("ed") => DiskFormat::AtariDos2Ed,
                    Some("dd") => DiskFormat::AtariDos2Dd,
                    Some("apple") => DiskFormat::AppleDos33,
                    Some(other) => {
                        println!("Unknown format '{}'. Use sd, ed, dd or apple.", other);
                        continue;
                    }
                };
                match ImageBuilder::new().format(format).build() {
                    Ok(img) => {
                        println!("Created {}", img.describe());
                        image = Some(img);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ => match image.as_mut() {
                Some(img) => {
                    if let Err(e) = image_command(img, &command, &parts) {
                        println!("Error: {}", e);
                    }
                }
                None => println!("No image loaded. Use 'open <path>' or 'create' first."),
            },
        }
    }

    if let Some(history_path) = history_path() {
        let _ = rl.save_history(&history_path);
    }
    println!("Goodbye!");
}

/// Commands that need an open image
fn image_command(img: &mut Image, command: &str, parts: &[String]) -> Result<()> {
    match command {
        "info" => print_info(img)?,
        "segments" => {
            println!("{:>3} {:<40} {:>7} {:>6}", "#", "Name", "Length", "Origin");
            println!("{}", "-".repeat(60));
            for (i, segment) in img.segments().iter().enumerate() {
                println!("{:>3} {:<40} {:>7} ${:04X}", i, segment.name, segment.len(), segment.origin);
                if let Some(error) = &segment.error {
                    println!("    error: {}", error);
                }
            }
        }
        "ls" | "dir" => {
            if img.files().is_empty() {
                println!("No files found.");
            }
            for dirent in img.files() {
                println!("{}", dirent);
            }
            if let Ok(info) = img.info() {
                println!("{} free sectors", info.free_sectors);
            }
        }
        "extract" => {
            let Some(name) = parts.get(1) else {
                println!("Usage: extract <name> [output]");
                return Ok(());
            };
            let data = img.get_file(name)?;
            let output = parts.get(2).unwrap_or(name);
            io::write_image(output, &data)?;
            println!("Extracted {} bytes to {}", data.len(), output);
        }
        "add" => {
            let Some(source) = parts.get(1) else {
                println!("Usage: add <file> [name] [type]");
                return Ok(());
            };
            let data = io::read_image(source)?;
            let name = parts.get(2).cloned().unwrap_or_else(|| host_file_name(source));
            let filetype = parts.get(3).map(String::as_str).unwrap_or("");
            img.write_file(&name, filetype, &data)?;
            println!("Added {} ({} bytes)", name, data.len());
        }
        "delete" => {
            let Some(name) = parts.get(1) else {
                println!("Usage: delete <name>");
                return Ok(());
            };
            img.delete_file(name)?;
            println!("Deleted {}", name);
        }
        "read-sector" => {
            let Some(num) = parts.get(1).and_then(|s| parse_number(s)) else {
                println!("Usage: read-sector <sector>");
                return Ok(());
            };
            let data = img.read_sector(num)?;
            println!("Sector {} ({} bytes):", num, data.len());
            print_hex_dump(data, 0, data.len());
        }
        "hexdump" => {
            let Some(segment) = parts.get(1).and_then(|s| find_segment(img, s)) else {
                println!("Usage: hexdump <segment # or name> [max bytes]");
                return Ok(());
            };
            let max = parts.get(2).and_then(|s| parse_number(s)).unwrap_or(256);
            print_hex_dump(&segment.to_bytes(img.buffer()), segment.origin as usize, max);
        }
        "map" => print!("{}", map::render(img, true)?),
        "comment" => {
            let (Some(segment), Some(index)) = (
                parts.get(1).and_then(|s| find_segment(img, s)),
                parts.get(2).and_then(|s| parse_number(s)),
            ) else {
                println!("Usage: comment <segment> <index> [text]");
                return Ok(());
            };
            if parts.len() > 3 {
                segment.set_comment(img.buffer_mut(), index..index + 1, parts[3..].join(" "));
            } else {
                match segment.get_comment(img.buffer(), index) {
                    Some(text) => println!("{}", text),
                    None => println!("No comment at {}", index),
                }
            }
        }
        "style" => {
            let Some(segment) = parts.get(1).and_then(|s| find_segment(img, s)) else {
                println!("Usage: style <segment> [<start> <end> <class>]");
                return Ok(());
            };
            let numbers: Vec<usize> = parts[2..].iter().filter_map(|s| parse_number(s)).collect();
            match numbers.as_slice() {
                [start, end, class] => {
                    segment.set_user_data(img.buffer_mut(), &[*start..*end], *class as u8)?;
                }
                _ => {
                    let classes: Vec<u8> = segment
                        .style_bytes(img.buffer())
                        .into_iter()
                        .map(|s| StyleBits(s).user_class())
                        .collect();
                    let mut start = 0;
                    for run in classes.chunk_by(|a, b| a == b) {
                        if run[0] != 0 {
                            println!("{:>5}..{:<5} class {}", start, start + run.len(), run[0]);
                        }
                        start += run.len();
                    }
                }
            }
        }
        "save" => {
            let path = match (parts.get(1), img.filename()) {
                (Some(path), _) => path.clone(),
                (None, Some(path)) => path.to_string(),
                (None, None) => {
                    println!("Usage: save <path>");
                    return Ok(());
                }
            };
            img.save(&path)?;
            println!("Saved to: {}", path);
        }
        "save-meta" | "load-meta" => {
            let Some(path) = parts
                .get(1)
                .map(std::path::PathBuf::from)
                .or_else(|| img.filename().map(sidecar_path))
            else {
                println!("Usage: {} <path>", command);
                return Ok(());
            };
            if command == "save-meta" {
                Metadata::from_buffer(img.buffer(), Vec::new()).save(&path)?;
                println!("Saved metadata to {}", path.display());
            } else {
                Metadata::load(&path)?.apply(img.buffer_mut())?;
                println!("Loaded metadata from {}", path.display());
            }
        }
        "shred" => {
            let fill = parts.get(1).and_then(|s| parse_number(s)).unwrap_or(0) as u8;
            let count = img.shred(fill)?;
            println!("Filled {} free sectors with ${:02X}", count, fill);
        }
        _ => println!("Unknown command: {}. Type 'help' for available commands.", command),
    }
    Ok(())
}

/// Segment by list index or name
fn find_segment(img: &Image, key: &str) -> Option<Segment> {
    match key.parse::<usize>() {
        Ok(index) => img.segments().get(index).cloned(),
        Err(_) => img.segment_by_name(key).cloned(),
    }
}

/// Parse command line input, respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn print_help() {
    println!("Available commands:");
    println!("  open <path>                    - Open a disk image (use quotes for paths with spaces)");
    println!("  create [sd|ed|dd|apple]        - Create a blank formatted image");
    println!("  info                           - Show media and filesystem information");
    println!("  segments                       - List segments");
    println!("  ls, dir                        - List files");
    println!("  extract <name> [output]        - Copy a file out of the image");
    println!("  add <file> [name] [type]       - Copy a host file into the image");
    println!("  delete <name>                  - Delete a file");
    println!("  read-sector <n>                - Hex dump a sector");
    println!("  hexdump <segment> [max]        - Hex dump a segment by number or name");
    println!("  map                            - Show the VTOC map");
    println!("  comment <segment> <i> [text]   - Show or set a comment");
    println!("  style <segment> [s e class]    - Show or set user data classes");
    println!("  save [path]                    - Save the image");
    println!("  save-meta [path]               - Save comments and styles to a sidecar file");
    println!("  load-meta [path]               - Load comments and styles from a sidecar file");
    println!("  shred [fill]                   - Fill free sectors");
    println!("  help                           - Show this help");
    println!("  quit, exit                     - Exit");
}

fn print_info(img: &Image) -> Result<()> {
    if let Some(filename) = img.filename() {
        println!("Filename: {}", filename);
    }
    println!("Media: {}", img.media().pretty_name());
    println!("Container: {}", img.compression());
    println!("Header: {}", img.header());
    match img.info() {
        Ok(info) => {
            println!("Filesystem: {}", info.fs_type);
            println!("Sectors: {} of {} bytes", info.total_sectors, info.sector_size);
            println!("Free sectors: {}", info.free_sectors);
            println!("Files: {} of {}", info.num_files, info.directory_capacity);
        }
        Err(e) => println!("Filesystem: none ({})", e),
    }
    println!("Changed: {}", if img.is_changed() { "Yes" } else { "No" });
    Ok(())
}

fn print_hex_dump(data: &[u8], origin: usize, max_bytes: usize) {
    let len = data.len().min(max_bytes);

    for (i, chunk) in data[..len].chunks(16).enumerate() {
        print!("{:04X}: ", origin + i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02X} ", byte);
            if j == 7 {
                print!(" ");
            }
        }
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            let c = if (32..127).contains(byte) { *byte as char } else { '.' };
            print!("{}", c);
        }
        println!("|");
    }

    if data.len() > max_bytes {
        println!("... ({} more bytes)", data.len() - max_bytes);
    }
}

fn parse_number(s: &str) -> Option<usize> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).or_else(|| s.strip_prefix('$')) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
