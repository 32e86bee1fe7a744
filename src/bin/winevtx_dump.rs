use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;

use encoding::all::encodings;
use encoding::types::Encoding;
use log::Level;
use winevtx::{EvtxParser, OutputFormat, ParseOutput, ParserSettings};

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

struct EvtxDump {
    parser_settings: ParserSettings,
    input: PathBuf,
    show_record_number: bool,
    show_summary: bool,
    output: Box<dyn Write>,
    verbosity_level: Option<Level>,
}

impl EvtxDump {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("INPUT")
                .expect("This is a required argument"),
        );

        let format_arg = matches
            .get_one::<String>("output-format")
            .expect("has default")
            .as_str();

        let output_format = match format_arg {
            "json" | "jsonl" => OutputFormat::Json,
            _ => OutputFormat::Xml,
        };

        // "jsonl" implies compact single-line records.
        let indent = !(matches.get_flag("no-indent") || format_arg == "jsonl");
        let show_record_number =
            !(matches.get_flag("no-show-record-number") || format_arg == "jsonl");

        let num_threads: u32 = *matches.get_one("num-threads").expect("has default");
        let num_threads = match (cfg!(feature = "multithreading"), num_threads) {
            (true, number) => number,
            (false, _) => {
                eprintln!(
                    "turned on threads, but library was compiled without `multithreading` feature! decoding sequentially"
                );
                1
            }
        };

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let ansi_codec = encodings()
            .iter()
            .find(|c| {
                c.name()
                    == matches
                        .get_one::<String>("ansi-codec")
                        .expect("has set default")
                        .as_str()
            })
            .expect("possible values are derived from `encodings()`");

        let output: Box<dyn Write> = if let Some(path) = matches.get_one::<String>("output-target")
        {
            Box::new(BufWriter::new(
                Self::create_output_file(path, !matches.get_flag("no-confirm-overwrite"))
                    .with_context(|| {
                        format!("An error occurred while creating output file at `{path}`")
                    })?,
            ))
        } else {
            Box::new(BufWriter::new(io::stdout()))
        };

        Ok(EvtxDump {
            parser_settings: ParserSettings::new()
                .num_threads(num_threads.try_into().expect("u32 -> usize"))
                .output_format(output_format)
                .verify_checksums(matches.get_flag("validate-checksums"))
                .stop_on_error(matches.get_flag("stop-after-one-error"))
                .indent(indent)
                .ansi_codec(*ansi_codec),
            input,
            show_record_number,
            show_summary: !matches.get_flag("no-summary"),
            output,
            verbosity_level,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        if let Err(err) = self.try_to_initialize_logging() {
            eprintln!("{err:?}");
        }

        let parser = EvtxParser::from_path(&self.input)
            .with_context(|| format!("Failed to open evtx file at: {}", self.input.display()))?
            .with_configuration(self.parser_settings.clone());

        let output: ParseOutput = parser
            .parse()
            .with_context(|| format!("Failed to parse {}", self.input.display()))?;

        for record in &output.records {
            if self.show_record_number {
                writeln!(self.output, "Record {}", record.record_id)?;
            }
            writeln!(self.output, "{}", record.data)?;
        }
        self.output.flush()?;

        if self.show_summary {
            eprintln!("{}", output.summary());
        }

        Ok(())
    }

    /// If `prompt` is passed, will display a confirmation prompt before
    /// overwriting files.
    fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
        let p = path.as_ref();

        if p.is_dir() {
            bail!(
                "There is a directory at {}, refusing to overwrite",
                p.display()
            );
        }

        if p.exists() {
            if prompt {
                match Confirm::new()
                    .with_prompt(format!(
                        "Are you sure you want to override output file at {}",
                        p.display()
                    ))
                    .default(false)
                    .interact()
                {
                    Ok(true) => Ok(File::create(p)?),
                    Ok(false) => bail!("Cancelled"),
                    Err(_e) => bail!("Failed to display confirmation prompt"),
                }
            } else {
                Ok(File::create(p)?)
            }
        } else {
            match p.parent() {
                Some(parent) => {
                    if !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }

                    Ok(File::create(p)?)
                }
                None => bail!("Output file cannot be root."),
            }
        }
    }

    fn try_to_initialize_logging(&self) -> Result<()> {
        if let Some(level) = self.verbosity_level {
            simplelog::WriteLogger::init(
                level.to_level_filter(),
                simplelog::Config::default(),
                io::stderr(),
            )
            .with_context(|| "Failed to initialize logging")?;
        }

        Ok(())
    }
}

fn main() -> Result<()> {
    let all_encodings = encodings()
        .iter()
        .filter(|&e| e.raw_decoder().is_ascii_compatible())
        .map(|e| e.name())
        .collect::<Vec<&'static str>>();

    let matches = Command::new("winevtx_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Utility to decode EVTX files to XML or JSON")
        .arg(
            Arg::new("INPUT")
                .required(true)
                .help("Input EVTX file path."),
        )
        .arg(
            Arg::new("num-threads")
                .short('t')
                .long("threads")
                .default_value("0")
                .value_parser(clap::value_parser!(u32).range(0..))
                .help("Sets the number of worker threads, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("output-format")
                .short('o')
                .long("format")
                .value_parser(["json", "xml", "jsonl"])
                .default_value("xml")
                .help("Sets the output format")
                .long_help(indoc!(
                    r#"Sets the output format:
                         "xml"   - prints XML output.
                         "json"  - prints JSON output.
                         "jsonl" - (jsonlines) same as json with --no-indent --no-show-record-number
                    "#
                )),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .action(ArgAction::Set)
                .help("Writes output to the file specified instead of stdout."),
        )
        .arg(
            Arg::new("no-indent")
                .long("no-indent")
                .action(ArgAction::SetTrue)
                .help("Do not indent output (XML and JSON)."),
        )
        .arg(
            Arg::new("no-show-record-number")
                .long("no-show-record-number")
                .action(ArgAction::SetTrue)
                .help("Do not print the `Record <id>` line before each record."),
        )
        .arg(
            Arg::new("validate-checksums")
                .long("validate-checksums")
                .action(ArgAction::SetTrue)
                .help("Advisory CRC32 verification of header and chunk ranges (mismatches are warnings)."),
        )
        .arg(
            Arg::new("stop-after-one-error")
                .long("stop-after-one-error")
                .action(ArgAction::SetTrue)
                .help("Abort on the first record that fails to decode."),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .value_parser(all_encodings)
                .default_value(encoding::all::ISO_8859_1.name())
                .help("The codec to use when decoding ansi string values."),
        )
        .arg(
            Arg::new("no-summary")
                .long("no-summary")
                .action(ArgAction::SetTrue)
                .help("Do not print the parse summary line to stderr."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Log verbosity (-v, -vv, -vvv); logs go to stderr."),
        )
        .get_matches();

    EvtxDump::from_cli_matches(&matches)?.run()
}
