use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;
use trawler::logger::{MultiLogger, verbosity_filter};
use trawler::{CrawlConfig, Crawler, Dispatch, Reactor, StopHandle};

struct CliOptions {
    seeds: Vec<String>,
    config: CrawlConfig,
    verbose: u8,
    quiet: bool,
    log_file: Option<PathBuf>,
}

enum Command {
    Run(Box<CliOptions>),
    Help,
}

const USAGE: &str = "\
Usage: trawler [OPTIONS] <SEED_URL>...

Options:
  -c, --concurrency <N>   parallel transfer limit (default 4)
  -d, --depth <N>         maximum link depth (default 2)
  -s, --max-size <BYTES>  per-page body size cap (default 8388608)
      --timeout <MS>      per-request timeout in milliseconds (default 30000)
      --cookies <FILE>    Netscape cookie file to load and save
      --log-file <FILE>   additional log sink (TRACE level)
  -v                      increase stderr log verbosity (repeatable)
  -q, --quiet             silence stderr logging
  -h, --help              show this help";

fn parse_args(args: impl Iterator<Item = String>) -> Result<Command, String> {
    let mut options = CliOptions {
        seeds: Vec::new(),
        config: CrawlConfig::default(),
        verbose: 0,
        quiet: false,
        log_file: None,
    };

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--concurrency" => {
                options.config.parallelism = parse_value(&mut args, &arg)?;
            }
            "-d" | "--depth" => {
                options.config.max_depth = parse_value(&mut args, &arg)?;
            }
            "-s" | "--max-size" => {
                options.config.max_page_size = parse_value(&mut args, &arg)?;
            }
            "--timeout" => {
                options.config.request_timeout_ms = parse_value(&mut args, &arg)?;
            }
            "--cookies" => {
                options.config.cookie_file = Some(PathBuf::from(take_value(&mut args, &arg)?));
            }
            "--log-file" => {
                options.log_file = Some(PathBuf::from(take_value(&mut args, &arg)?));
            }
            "-v" => options.verbose += 1,
            "-q" | "--quiet" => options.quiet = true,
            "-h" | "--help" => return Ok(Command::Help),
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}"));
            }
            _ => options.seeds.push(arg),
        }
    }

    if options.seeds.is_empty() {
        return Err("no seed URLs given".to_string());
    }

    Ok(Command::Run(Box::new(options)))
}

fn take_value(
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
    option: &str,
) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("option {option} requires a value"))
}

fn parse_value<T: std::str::FromStr>(
    args: &mut std::iter::Peekable<impl Iterator<Item = String>>,
    option: &str,
) -> Result<T, String> {
    take_value(args, option)?
        .parse()
        .map_err(|_| format!("option {option} requires a numeric value"))
}

fn install_logger(options: &CliOptions) -> Result<(), String> {
    let mut logger = MultiLogger::new(verbosity_filter(options.verbose));
    if options.quiet {
        logger = logger.quiet();
    }
    if let Some(path) = &options.log_file {
        logger = logger
            .add_file(path, LevelFilter::Trace)
            .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;
    }
    logger.install().map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("trawler: {message}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    if let Err(message) = install_logger(&options) {
        eprintln!("trawler: {message}");
        return ExitCode::FAILURE;
    }

    let reactor = match Reactor::new() {
        Ok(reactor) => reactor,
        Err(e) => {
            log::error!(target: "main", "{e}");
            return ExitCode::FAILURE;
        }
    };

    // The crawler gets its own stop switch so Ctrl-C still runs the
    // orderly teardown (cancel in-flight, save cookies) inside `run`.
    let stop = StopHandle::new();
    let mut crawler = match Crawler::new(options.config.clone(), stop.clone()) {
        Ok(crawler) => crawler,
        Err(e) => {
            log::error!(target: "main", "{e}");
            return ExitCode::FAILURE;
        }
    };

    crawler.on_page(|page| {
        println!(
            "[+] {} ({} bytes, {})",
            page.url,
            page.body.len(),
            page.content_type
        );
    });
    crawler.on_error(|failure| {
        let reason = match failure.error {
            Some(error) => error.to_string(),
            None => format!("HTTP {}", failure.status),
        };
        println!("[-] {} ({})", failure.url, reason);
    });

    let mut accepted = 0;
    for seed in &options.seeds {
        if crawler.add_url(seed) {
            accepted += 1;
        }
    }
    if accepted == 0 {
        log::error!(target: "main", "none of the seed URLs were usable");
        return ExitCode::FAILURE;
    }

    let start = std::time::Instant::now();
    let outcome = reactor.dispatch(async {
        let interrupt_stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!(target: "main", "interrupt received, stopping crawl");
                interrupt_stop.stop();
            }
        });

        crawler.run().await
    });

    match outcome {
        Dispatch::Drained(stats) => {
            println!(
                "\n[+] {} pages crawled, {} failures in {:.2?} (peak concurrency {})",
                stats.crawled,
                stats.failed,
                start.elapsed(),
                stats.peak_in_flight
            );
            ExitCode::SUCCESS
        }
        Dispatch::Stopped => {
            println!("\n[!] crawl stopped after {:.2?}", start.elapsed());
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> std::vec::IntoIter<String> {
        list.iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn seeds_and_options_are_parsed() {
        let command = parse_args(args(&[
            "-c",
            "8",
            "--depth",
            "3",
            "http://a.example/",
            "http://b.example/",
        ]))
        .expect("parse");
        let Command::Run(options) = command else {
            panic!("expected run command");
        };
        assert_eq!(options.config.parallelism, 8);
        assert_eq!(options.config.max_depth, 3);
        assert_eq!(options.seeds.len(), 2);
    }

    #[test]
    fn missing_seeds_is_an_error() {
        assert!(parse_args(args(&["-c", "4"])).is_err());
        assert!(parse_args(args(&[])).is_err());
    }

    #[test]
    fn unknown_option_is_an_error() {
        assert!(parse_args(args(&["--frobnicate", "http://a/"])).is_err());
    }

    #[test]
    fn option_without_value_is_an_error() {
        assert!(parse_args(args(&["http://a/", "-c"])).is_err());
    }

    #[test]
    fn help_short_circuits() {
        assert!(matches!(
            parse_args(args(&["-h"])),
            Ok(Command::Help)
        ));
    }
}
