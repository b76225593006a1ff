/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains main entrypoint for the DVSoC Emulator.

--*/

use anyhow::{anyhow, bail, Context};
use clap::{arg, value_parser, ArgAction};
use dvsoc_emu_bus::{Bus, Clock};
use dvsoc_emu_periph::jtag_lock::{
    OFFSET_LOCK_ENABLE, OFFSET_PASSWORD_PRESENTED, OFFSET_PASSWORD_REFERENCE_SOFT,
};
use dvsoc_emu_periph::{
    counter, lock_handler, DvSocRootBus, JtagPins, LoopBackWire, PasswordKey, SecurityConfig,
};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Cycles firmware lets the counter run before sampling a reference.
const COUNTER_SAMPLE_CYCLES: u64 = 16;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Accepts either 4 ASCII characters or a `0x` prefixed word.
fn parse_word(text: &str) -> anyhow::Result<u32> {
    match text.strip_prefix("0x") {
        Some(hex) => {
            u32::from_str_radix(hex, 16).with_context(|| format!("invalid word {text:?}"))
        }
        None => Ok(PasswordKey::encode(text)
            .with_context(|| format!("invalid password {text:?}"))?
            .value()),
    }
}

fn write_reg(
    soc: &mut DvSocRootBus,
    addr: RvAddr,
    name: &str,
    val: RvData,
) -> anyhow::Result<()> {
    soc.write(RvSize::Word, addr, val).map_err(|err| {
        anyhow!("{name} write failed with {err:?}; is it present in this policy?")
    })?;
    tracing::debug!(name, val = format_args!("{val:#010x}"), "firmware write");
    Ok(())
}

fn read_reg(soc: &mut DvSocRootBus, addr: RvAddr, name: &str) -> anyhow::Result<RvData> {
    soc.read(RvSize::Word, addr)
        .map_err(|err| anyhow!("{name} read failed with {err:?}"))
}

/// Starts the counter, lets it run and returns the sampled value.
fn sample_counter(clock: &Clock, soc: &mut DvSocRootBus) -> anyhow::Result<u32> {
    let base = DvSocRootBus::COUNTER_OFFSET;
    write_reg(soc, base + counter::OFFSET_CONTROL, "counter control", 1)?;
    clock.run(COUNTER_SAMPLE_CYCLES, soc);
    read_reg(soc, base + counter::OFFSET_VALUE, "counter value")
}

fn cli() -> clap::Command<'static> {
    clap::Command::new("dvsoc-emu")
        .about("DVSoC JTAG lock emulator")
        .arg(
            arg!(--config <FILE> "Security configuration file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"jtag-debug" "Open the debug port and disable every JTAG vulnerability")
                .action(ArgAction::SetTrue),
        )
        .arg(arg!(--lock "Set lock_enable").action(ArgAction::SetTrue))
        .arg(
            arg!(--password <PASSWORD> "password_presented: 4 ASCII characters or 0x-prefixed hex")
                .required(false),
        )
        .arg(
            arg!(--reference <REFERENCE> "password_reference_soft: 0x-prefixed hex, 4 ASCII characters or `counter`")
                .required(false),
        )
        .arg(arg!(--keys <DIGITS> "Hex digits pressed on the dashboard keypad").required(false))
        .arg(
            arg!(--"output-signal" "Drive output_signal high from firmware")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"hold-loop-back" <LEVEL> "Cut the loop-back wire and hold loop_back_signal at 0 or 1")
                .required(false)
                .value_parser(value_parser!(u8).range(0..=1)),
        )
        .arg(
            arg!(--cycles <N> "Clock cycles to run after the firmware writes")
                .required(false)
                .default_value("1")
                .value_parser(value_parser!(u64)),
        )
        .arg(arg!(--verbose "Enable debug logging").action(ArgAction::SetTrue))
}

fn main() -> anyhow::Result<()> {
    let args = cli().get_matches();

    let flag = |name: &str| matches!(args.get_one::<bool>(name), Some(true));
    init_logging(flag("verbose"));

    let config_path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let config = SecurityConfig::load(config_path)?.with_debug_override(flag("jtag-debug"));

    let clock = Clock::new();
    let mut soc = DvSocRootBus::from_config(&clock, &config)
        .with_context(|| format!("cannot build the SoC from {}", config_path.display()))?;
    let gate = DvSocRootBus::JTAG_LOCK_OFFSET;

    if flag("lock") {
        write_reg(&mut soc, gate + OFFSET_LOCK_ENABLE, "lock_enable", 1)?;
    }
    if let Some(text) = args.get_one::<String>("reference") {
        let reference = match text.as_str() {
            "counter" => sample_counter(&clock, &mut soc)?,
            _ => parse_word(text)?,
        };
        write_reg(
            &mut soc,
            gate + OFFSET_PASSWORD_REFERENCE_SOFT,
            "password_reference_soft",
            reference,
        )?;
    }
    if let Some(text) = args.get_one::<String>("password") {
        let password = parse_word(text)?;
        write_reg(
            &mut soc,
            gate + OFFSET_PASSWORD_PRESENTED,
            "password_presented",
            password,
        )?;
    }
    if let Some(digits) = args.get_one::<String>("keys") {
        let Some(keypad) = soc.keypad.as_ref() else {
            bail!("--keys needs admin_dashboard_key in the configuration");
        };
        let mut keypad = keypad.clone();
        for digit in digits.chars() {
            let key = digit
                .to_digit(16)
                .with_context(|| format!("{digit:?} is not a hex digit"))?;
            keypad.set_scan(key as u8);
            clock.tick(&mut soc);
        }
    }

    let hold = args.get_one::<u8>("hold-loop-back");
    if flag("output-signal") || hold.is_some() {
        let Some(handler) = soc.lock_handler.as_ref() else {
            bail!("--output-signal and --hold-loop-back need loop_back_signal in the configuration");
        };
        let mut handler = handler.clone();
        if let Some(&level) = hold {
            handler.set_wire(LoopBackWire::Held(level != 0));
        }
        if flag("output-signal") {
            write_reg(
                &mut soc,
                DvSocRootBus::LOCK_HANDLER_OFFSET + lock_handler::OFFSET_OUTPUT_OUT,
                "output_out",
                1,
            )?;
        }
    }

    let cycles = args.get_one::<u64>("cycles").copied().unwrap_or(1);
    clock.run(cycles, &mut soc);

    let resolved = soc.resolved().clone();
    println!("policy: {}", resolved.policy);
    for o in resolved.overrides.iter() {
        println!("  {} forced off by {}", o.cleared, o.trigger);
    }
    println!("registers:");
    for info in soc.jtag_lock.register_map() {
        let value = read_reg(&mut soc, gate + info.offset, info.name)?;
        println!(
            "  {:#06x} {:<24} {} {:>2} bits = {:#010x}",
            info.offset,
            info.name,
            if info.writable { "rw" } else { "ro" },
            info.width,
            value
        );
    }

    let decision = soc.jtag_lock.decision();
    println!(
        "gate: pass_through={} jtag_status={} password_status={}",
        decision.pass_through as u8, decision.jtag_status as u8, decision.password_status as u8
    );
    let pins = JtagPins {
        tdi: true,
        tms: true,
        tck: true,
    };
    let route = soc.jtag_lock.route(pins, true);
    println!(
        "route: cpu tdi/tms/tck={}{}{} tdo={}",
        route.cpu.tdi as u8, route.cpu.tms as u8, route.cpu.tck as u8, route.tdo as u8
    );
    if let Some(keypad) = soc.keypad.as_ref() {
        println!(
            "keypad: entry={:04x} unlocked={}",
            keypad.entry().0,
            keypad.unlocked() as u8
        );
    }
    if let Some(handler) = soc.lock_handler.clone() {
        let loop_back_in = read_reg(
            &mut soc,
            DvSocRootBus::LOCK_HANDLER_OFFSET + lock_handler::OFFSET_LOOP_BACK_IN,
            "loop_back_in",
        )?;
        println!(
            "lock_handler: output={} loop_back_in={} lock_error={}",
            handler.output_signal() as u8,
            loop_back_in,
            handler.lock_error() as u8
        );
    }
    println!("cycles: {}", clock.now());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli() {
        cli().debug_assert();
    }

    #[test]
    fn test_cli_flags() {
        let args = cli()
            .try_get_matches_from([
                "dvsoc-emu",
                "--config",
                "soc.toml",
                "--jtag-debug",
                "--keys",
                "c0de",
            ])
            .unwrap();
        assert_eq!(args.get_one::<bool>("jtag-debug"), Some(&true));
        assert_eq!(args.get_one::<bool>("lock"), Some(&false));
        assert_eq!(args.get_one::<String>("keys").map(String::as_str), Some("c0de"));
        assert_eq!(args.get_one::<u64>("cycles"), Some(&1));
        assert_eq!(
            args.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("soc.toml"))
        );

        assert!(cli()
            .try_get_matches_from(["dvsoc-emu", "--config", "soc.toml", "--cycles", "many"])
            .is_err());
        assert!(cli()
            .try_get_matches_from(["dvsoc-emu", "--config", "soc.toml", "--hold-loop-back", "2"])
            .is_err());
    }

    #[test]
    fn test_parse_word() {
        assert_eq!(parse_word("pass").unwrap(), 0x7061_7373);
        assert_eq!(parse_word("0xdeadbeef").unwrap(), 0xdead_beef);
        assert!(parse_word("0xnope").is_err());
        assert!(parse_word("toolong").is_err());
    }
}
