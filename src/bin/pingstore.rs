#![allow(unknown_lints)]

extern crate chrono;
extern crate clap;
extern crate fern;
extern crate pingstore;
extern crate serde_json;

#[macro_use]
extern crate log;

use chrono::Utc;
use clap::{App, Arg, ArgMatches, SubCommand};
use pingstore::config;
use pingstore::database::INTERNAL_STORE;
use pingstore::registry::Registry;
use pingstore::{Database, Error, MetricKind, PingCollector};
use serde_json::Value;
use std::process;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn parse_args<'a>() -> ArgMatches<'a> {
    App::new("pingstore")
        .version(VERSION.unwrap_or("unknown"))
        .about("inspect, collect and reset persisted telemetry")
        .arg(
            Arg::with_name("config-file")
                .long("config")
                .short("C")
                .value_name("config")
                .required(true)
                .help("The config file to feed in.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Turn on verbose output."),
        )
        .subcommand(
            SubCommand::with_name("inspect")
                .about("print persisted records as JSON, marking the ones the config defines")
                .arg(Arg::with_name("store").help("Only show this store.")),
        )
        .subcommand(
            SubCommand::with_name("collect")
                .about("assemble a store into a payload and print it as JSON")
                .arg(
                    Arg::with_name("store")
                        .required(true)
                        .help("The store to collect."),
                ),
        )
        .subcommand(
            SubCommand::with_name("reset")
                .about("forget application lifetime data")
                .arg(
                    Arg::with_name("all")
                        .long("all")
                        .help("Forget user lifetime data and the client id as well."),
                ),
        )
        .get_matches()
}

fn run(args: &ArgMatches) -> Result<(), Error> {
    let filename = args.value_of("config-file").unwrap_or_default();
    let (config, buffer) = config::read_config_file(filename)?;
    let registry = Registry::from_toml(&buffer)?;
    info!("{} metrics defined in {}", registry.len(), filename);
    if config.data_directory.is_none() {
        warn!("no data-directory in {}, nothing is persisted", filename);
    }
    let db = Database::new(config)?;

    match args.subcommand() {
        ("inspect", Some(sub)) => {
            let mut records = db.persisted_json(sub.value_of("store"))?;
            mark_registered(&mut records, &registry);
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        ("collect", Some(sub)) => {
            let store = sub.value_of("store").unwrap_or_default();
            if !registry
                .iter()
                .any(|m| m.meta.send_in_pings.iter().any(|s| s == store))
            {
                warn!("no metric in {} reports to {}", filename, store);
            }
            let payload = db.collect(store)?;
            println!("{}", payload.to_json()?);
        }
        ("reset", Some(sub)) => {
            if sub.is_present("all") {
                db.clear_all()?;
            } else {
                db.clear_application_lifetime()?;
            }
        }
        _ => {
            eprintln!("{}", args.usage());
            process::exit(2);
        }
    }
    Ok(())
}

/// Flag every persisted record with whether the registry defines a metric of
/// that kind and identity. Internal bookkeeping is left alone.
fn mark_registered(records: &mut Value, registry: &Registry) {
    for kind in MetricKind::ALL.iter() {
        let entries = match records.get_mut(kind.as_str()).and_then(|v| v.as_array_mut()) {
            Some(entries) => entries,
            None => continue,
        };
        for entry in entries.iter_mut() {
            if entry["store"] == INTERNAL_STORE {
                continue;
            }
            let registered = registered_kind(entry, registry) == Some(*kind);
            if let Some(fields) = entry.as_object_mut() {
                fields.insert("registered".to_string(), Value::Bool(registered));
            }
        }
    }
}

fn registered_kind(entry: &Value, registry: &Registry) -> Option<MetricKind> {
    let category = entry["category"].as_str()?;
    let name = entry["name"].as_str()?;
    registry.get(category, name).map(|m| m.kind)
}

fn main() {
    let args = parse_args();

    let level = match args.occurrences_of("verbose") {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let logging = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][{}] {}",
                record.target(),
                record.line().unwrap_or(0),
                Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply();
    if let Err(e) = logging {
        eprintln!("could not set up logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&args) {
        error!("{}", e);
        eprintln!("pingstore: {}", e);
        process::exit(1);
    }
}
