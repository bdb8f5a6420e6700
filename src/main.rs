use clap::arg_enum;
use eternal_patcher::diff::{self, EntryOptions};
use eternal_patcher::patch::{Addressing, RawDocument};
use eternal_patcher::update::{self, Refresh};
use eternal_patcher::{patch_file, target, DefinitionStore, Error, Format, Result};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::process;
use structopt::StructOpt;

arg_enum! {
    #[derive(Debug)]
    enum AddressingArg {
        Pattern,
        Offset
    }
}

impl From<AddressingArg> for Addressing {
    fn from(arg: AddressingArg) -> Self {
        match arg {
            AddressingArg::Pattern => Addressing::Pattern,
            AddressingArg::Offset => Addressing::Offset,
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "eternal-patcher",
    about = "Detects the build of an executable and applies its patch definitions"
)]
struct Options {
    /// Updates the patch definitions from --source
    #[structopt(long)]
    update: bool,
    /// Patches the executable using the definitions
    #[structopt(long, parse(from_os_str))]
    patch: Option<PathBuf>,
    /// Patch definitions file (.json, or .rbp for the binary form)
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "EternalPatcher.json",
        env = "ETERNAL_PATCHER_DEFINITIONS"
    )]
    definitions: PathBuf,
    /// Where --update fetches the latest definitions from
    #[structopt(long, parse(from_os_str), env = "ETERNAL_PATCHER_SOURCE")]
    source: Option<PathBuf>,
    /// More log output (repeat for more)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
    /// Only log errors
    #[structopt(short, long)]
    quiet: bool,
    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Builds a definition entry from an original and a patched executable
    Diff {
        #[structopt(index = 1, required = true, name = "ORIGINAL", parse(from_os_str))]
        original: PathBuf,
        #[structopt(index = 2, required = true, name = "PATCHED", parse(from_os_str))]
        patched: PathBuf,
        /// Build id for the generated entry
        #[structopt(long)]
        id: String,
        /// Equal bytes tolerated inside one section
        #[structopt(short, long, default_value = "1")]
        bad_bytes: usize,
        #[structopt(
            long,
            possible_values = &AddressingArg::variants(),
            case_insensitive = true,
            default_value = "Pattern"
        )]
        addressing: AddressingArg,
        #[structopt(long, default_value = "0")]
        signature_offset: usize,
        #[structopt(long, default_value = "64")]
        signature_len: usize,
        /// Definitions file to add the entry to, printed as JSON if absent
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
    },
}

fn main() {
    if std::env::args_os().len() <= 1 {
        // clap prints to stdout; exit 1 like any other incomplete invocation.
        Options::clap().print_help().ok();
        println!();
        process::exit(1);
    }

    let opt = Options::from_args();
    init_logging(&opt);

    let code = match run(opt) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };
    process::exit(code);
}

fn init_logging(opt: &Options) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if opt.verbose > 0 {
        builder.filter_level(match opt.verbose {
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        });
    } else if opt.quiet {
        builder.filter_level(LevelFilter::Error);
    }
    builder.init();
}

fn run(opt: Options) -> Result<bool> {
    if let Some(command) = opt.command {
        return match command {
            Command::Diff {
                original,
                patched,
                id,
                bad_bytes,
                addressing,
                signature_offset,
                signature_len,
                output,
            } => {
                let options = EntryOptions {
                    addressing: addressing.into(),
                    signature_offset,
                    signature_len,
                };
                run_diff(&original, &patched, &id, bad_bytes, options, output.as_deref())
            }
        };
    }

    if !opt.update && opt.patch.is_none() {
        println!("No executable was specified for patching!");
        return Ok(false);
    }

    if opt.update {
        println!("Checking for updates...");
        let source = match &opt.source {
            Some(source) => source,
            None => {
                eprintln!("No definitions source configured, use --source or ETERNAL_PATCHER_SOURCE.");
                return Ok(false);
            }
        };
        match update::refresh(source, &opt.definitions)? {
            Refresh::Updated => println!("Patch definitions updated."),
            Refresh::UpToDate => println!("No updates available."),
        }
    }

    let path = match opt.patch {
        Some(path) => path,
        None => return Ok(true),
    };

    println!("Loading patch definitions file...");
    let raw = target::read(&opt.definitions)?;
    let store = DefinitionStore::load(&raw, Format::from_path(&opt.definitions))?;
    println!("Done.");

    if store.is_empty() {
        println!("Unable to patch: {}", Error::NoPatchesLoaded);
        return Ok(false);
    }

    // Detection and patching happen in one pass, the file is written by the time it returns.
    println!("Checking game build and applying patches...");
    let report = match patch_file(&store, &path) {
        Ok(report) => report,
        Err(e @ Error::NoSupportedBuild) => {
            println!("Unable to apply patches: {}", e);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    println!("{} detected.", report.build().id);
    for result in report.results() {
        match &result.outcome {
            Ok(_) => println!("{} : Success", result.patch.description),
            Err(failure) => println!("{} : Failure ({})", result.patch.description, failure),
        }
    }
    println!("\n{} out of {} applied.", report.successes(), report.total());

    Ok(report.is_complete())
}

fn run_diff(
    original: &Path,
    patched: &Path,
    id: &str,
    bad_bytes: usize,
    options: EntryOptions,
    output: Option<&Path>,
) -> Result<bool> {
    let input = target::read(original)?;
    let changed = target::read(patched)?;

    let sections = diff::sections(&input, &changed, bad_bytes)?;
    for (n, section) in sections.iter().enumerate() {
        eprintln!("Section {}: {:02X?}", n, section.original);
    }
    eprintln!("Sections found: {}", sections.len());

    let entry = diff::build_entry(id, &input, &sections, options)?;

    match output {
        Some(path) => {
            let format = Format::from_path(path);
            let mut document = if path.exists() {
                format.decode(&target::read(path)?)?
            } else {
                RawDocument::default()
            };
            document.builds.retain(|b| b.id.as_deref() != Some(id));
            document.builds.push(entry);
            // Refuse to write something the patcher could not load back.
            DefinitionStore::from_document(document.clone())?;
            target::write(path, &format.encode(&document)?)?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            let document = RawDocument {
                builds: vec![entry],
            };
            let json = Format::Json.encode(&document)?;
            println!("{}", String::from_utf8_lossy(&json));
        }
    }
    Ok(true)
}
