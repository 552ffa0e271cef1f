//! The daemon's command-line configuration surface. Deliberately small:
//! the core library takes its parameters as plain constructor arguments and
//! never reads the environment itself, so all of the "real" configuration
//! parsing lives here and nowhere else.

use std::net::IpAddr;
use std::time::Duration;

use kvmesh_base::{err, Result};
use kvmesh_txn::Mode;

pub struct Config {
    pub interfaces: Vec<String>,
    pub mode: Mode,
    pub own_addrs: Vec<IpAddr>,
    pub staleness: Duration,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interfaces: Vec::new(),
            mode: Mode::Slave,
            own_addrs: Vec::new(),
            staleness: Duration::from_secs(30),
            log_filter: "kvmesh=info".to_string(),
        }
    }
}

const USAGE: &str = "\
usage: kvmeshd --interface <name> [--interface <name> ...] [--own-addr <ip> ...]
               [--master | --slave] [--staleness <seconds>] [--log <filter>]";

/// Hand-rolled flag parsing: no external CLI-parsing crate is worth pulling
/// in for a handful of repeatable flags.
pub fn parse_args<I: Iterator<Item = String>>(args: I) -> Result<Config> {
    let mut config = Config::default();
    let mut args = args.peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--interface" => {
                let value = args.next().ok_or_else(|| err("--interface requires a value"))?;
                config.interfaces.push(value);
            }
            "--own-addr" => {
                let value = args.next().ok_or_else(|| err("--own-addr requires a value"))?;
                let addr: IpAddr = value
                    .parse()
                    .map_err(|_| err(format!("not an IP address: {value}")))?;
                config.own_addrs.push(addr);
            }
            "--master" => config.mode = Mode::Master,
            "--slave" => config.mode = Mode::Slave,
            "--staleness" => {
                let value = args.next().ok_or_else(|| err("--staleness requires a value"))?;
                let seconds: u64 = value
                    .parse()
                    .map_err(|_| err(format!("not a number of seconds: {value}")))?;
                config.staleness = Duration::from_secs(seconds);
            }
            "--log" => {
                config.log_filter = args.next().ok_or_else(|| err("--log requires a value"))?;
            }
            "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(err(format!("unrecognised argument: {other}\n{USAGE}"))),
        }
    }

    if config.interfaces.is_empty() {
        return Err(err(format!("at least one --interface is required\n{USAGE}")));
    }

    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn args(s: &[&str]) -> impl Iterator<Item = String> {
        s.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn requires_at_least_one_interface() {
        assert!(parse_args(args(&["--master"])).is_err());
    }

    #[test]
    fn parses_repeated_interfaces_and_mode() {
        let config = parse_args(args(&["--interface", "eth0", "--interface", "wlan0", "--master"])).unwrap();
        assert_eq!(config.interfaces, vec!["eth0", "wlan0"]);
        assert_eq!(config.mode, Mode::Master);
    }

    #[test]
    fn parses_own_addr_and_staleness() {
        let config = parse_args(args(&[
            "--interface", "eth0", "--own-addr", "10.0.0.1", "--staleness", "90",
        ]))
        .unwrap();
        assert_eq!(config.own_addrs, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(config.staleness, Duration::from_secs(90));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse_args(args(&["--interface", "eth0", "--bogus"])).is_err());
    }
}
