/*++

Licensed under the Apache-2.0 license.

File Name:

    policy.rs

Abstract:

    File contains the JTAG security policy resolver. The vulnerability
    switches of a SoC build are reduced, once, to exactly one gate wiring.

--*/

use crate::comparator::BitOrder;
use crate::keypad::{DashboardKey, DashboardKeyError};
use crate::password::{PasswordError, PasswordKey};
use crate::security_config::SecurityConfig;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("jtag_password is enabled but jtag_password_key is not configured")]
    MissingPasswordKey,
    #[error("invalid jtag_password_key: {0}")]
    InvalidPasswordKey(#[source] PasswordError),
    #[error("no JTAG security policy selected; enable a jtag_* switch or debug_override")]
    NoPolicySelected,
    #[error("security flags {0} and {1} cannot be enabled together")]
    ContradictoryFlags(SecurityFlag, SecurityFlag),
    #[error("invalid admin_dashboard_key: {0}")]
    InvalidDashboardKey(#[from] DashboardKeyError),
}

/// One vulnerability switch of the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecurityFlag {
    DebugOverride,
    LockOverlap,
    LockFirmware,
    Password,
    PasswordRandom,
}

impl SecurityFlag {
    pub const ALL: [SecurityFlag; 5] = [
        SecurityFlag::DebugOverride,
        SecurityFlag::LockOverlap,
        SecurityFlag::LockFirmware,
        SecurityFlag::Password,
        SecurityFlag::PasswordRandom,
    ];

    /// Configuration key of the switch.
    pub fn key(&self) -> &'static str {
        match self {
            SecurityFlag::DebugOverride => "debug_override",
            SecurityFlag::LockOverlap => "jtag_lock_overlap",
            SecurityFlag::LockFirmware => "jtag_lock_firmware",
            SecurityFlag::Password => "jtag_password",
            SecurityFlag::PasswordRandom => "jtag_password_random",
        }
    }
}

impl fmt::Display for SecurityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Set of enabled switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityFlags {
    pub debug_override: bool,
    pub lock_overlap: bool,
    pub lock_firmware: bool,
    pub password: bool,
    pub password_random: bool,
}

impl SecurityFlags {
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            debug_override: config.debug_override,
            lock_overlap: config.jtag_lock_overlap,
            lock_firmware: config.jtag_lock_firmware,
            password: config.jtag_password,
            password_random: config.jtag_password_random,
        }
    }

    pub fn get(&self, flag: SecurityFlag) -> bool {
        match flag {
            SecurityFlag::DebugOverride => self.debug_override,
            SecurityFlag::LockOverlap => self.lock_overlap,
            SecurityFlag::LockFirmware => self.lock_firmware,
            SecurityFlag::Password => self.password,
            SecurityFlag::PasswordRandom => self.password_random,
        }
    }

    pub fn set(&mut self, flag: SecurityFlag, value: bool) {
        let field = match flag {
            SecurityFlag::DebugOverride => &mut self.debug_override,
            SecurityFlag::LockOverlap => &mut self.lock_overlap,
            SecurityFlag::LockFirmware => &mut self.lock_firmware,
            SecurityFlag::Password => &mut self.password,
            SecurityFlag::PasswordRandom => &mut self.password_random,
        };
        *field = value;
    }

    /// Whether a firmware lock bit gates the port.
    pub fn lock_bit(&self) -> bool {
        self.lock_overlap || self.lock_firmware
    }

    pub fn enabled(&self) -> impl Iterator<Item = SecurityFlag> + '_ {
        SecurityFlag::ALL.into_iter().filter(|flag| self.get(*flag))
    }
}

/// While `trigger` is enabled, every flag in `clears` is forced off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideRule {
    pub trigger: SecurityFlag,
    pub clears: &'static [SecurityFlag],
}

/// Override rules, applied in order. A flag cleared by an earlier rule no
/// longer triggers a later one.
pub const OVERRIDE_RULES: [OverrideRule; 3] = [
    OverrideRule {
        trigger: SecurityFlag::DebugOverride,
        clears: &[
            SecurityFlag::LockOverlap,
            SecurityFlag::LockFirmware,
            SecurityFlag::Password,
            SecurityFlag::PasswordRandom,
        ],
    },
    OverrideRule {
        trigger: SecurityFlag::LockFirmware,
        clears: &[SecurityFlag::LockOverlap, SecurityFlag::PasswordRandom],
    },
    OverrideRule {
        trigger: SecurityFlag::PasswordRandom,
        clears: &[SecurityFlag::Password],
    },
];

/// A flag that was requested but forced off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedOverride {
    pub trigger: SecurityFlag,
    pub cleared: SecurityFlag,
}

/// Runs [`OVERRIDE_RULES`] over `flags` and reports every flag it turned off.
pub fn apply_overrides(flags: &mut SecurityFlags) -> Vec<AppliedOverride> {
    let mut applied = Vec::new();
    for rule in OVERRIDE_RULES.iter() {
        if !flags.get(rule.trigger) {
            continue;
        }
        for &cleared in rule.clears {
            if flags.get(cleared) {
                flags.set(cleared, false);
                applied.push(AppliedOverride {
                    trigger: rule.trigger,
                    cleared,
                });
            }
        }
    }
    applied
}

/// The wiring of the JTAG gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    /// Debug lines always connected.
    OpenDebug,
    /// Connected while firmware holds the lock bit at 1.
    LockBitOnly,
    /// Connected while the lock bit is 1 and the presented password matches `key`.
    LockBitWithStaticPassword { key: PasswordKey },
    /// Connected while the presented password matches `key`.
    StaticPasswordOnly { key: PasswordKey },
    /// Connected while the presented password matches a firmware-written reference.
    RandomPasswordSoftwareCompare,
    /// Connected while the lock bit is 1 and the presented password matches a
    /// firmware-written reference.
    LockBitWithRandomPassword,
}

impl SecurityPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityPolicy::OpenDebug => "OpenDebug",
            SecurityPolicy::LockBitOnly => "LockBitOnly",
            SecurityPolicy::LockBitWithStaticPassword { .. } => "LockBitWithStaticPassword",
            SecurityPolicy::StaticPasswordOnly { .. } => "StaticPasswordOnly",
            SecurityPolicy::RandomPasswordSoftwareCompare => "RandomPasswordSoftwareCompare",
            SecurityPolicy::LockBitWithRandomPassword => "LockBitWithRandomPassword",
        }
    }

    pub fn uses_lock_bit(&self) -> bool {
        matches!(
            self,
            SecurityPolicy::LockBitOnly
                | SecurityPolicy::LockBitWithStaticPassword { .. }
                | SecurityPolicy::LockBitWithRandomPassword
        )
    }

    pub fn uses_password(&self) -> bool {
        self.bit_order().is_some()
    }

    /// Whether firmware supplies the reference password.
    pub fn uses_soft_reference(&self) -> bool {
        matches!(
            self,
            SecurityPolicy::RandomPasswordSoftwareCompare
                | SecurityPolicy::LockBitWithRandomPassword
        )
    }

    pub fn static_key(&self) -> Option<PasswordKey> {
        match self {
            SecurityPolicy::LockBitWithStaticPassword { key }
            | SecurityPolicy::StaticPasswordOnly { key } => Some(*key),
            _ => None,
        }
    }

    /// Comparator wiring, if the policy checks a password.
    pub fn bit_order(&self) -> Option<BitOrder> {
        match self {
            SecurityPolicy::LockBitWithStaticPassword { .. }
            | SecurityPolicy::StaticPasswordOnly { .. } => Some(BitOrder::MsbFirst),
            SecurityPolicy::RandomPasswordSoftwareCompare
            | SecurityPolicy::LockBitWithRandomPassword => Some(BitOrder::LsbFirst),
            _ => None,
        }
    }

    /// Writable bits of `password_reference_soft`.
    pub fn soft_reference_mask(&self) -> u32 {
        match self {
            SecurityPolicy::LockBitWithRandomPassword => 0x7fff_ffff,
            _ => u32::MAX,
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.static_key() {
            Some(key) => write!(f, "{} (key {})", self.name(), key),
            None => f.write_str(self.name()),
        }
    }
}

/// Behavior of the lock bit on system reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRetention {
    /// `jtag_lock_overlap`: the port relocks on every reset.
    ClearedOnReset,
    /// `jtag_lock_firmware`: the bit keeps whatever firmware last wrote.
    SurvivesReset,
}

/// Outcome of resolving a [`SecurityConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub policy: SecurityPolicy,
    /// Flags after every override rule ran.
    pub flags: SecurityFlags,
    pub overrides: Vec<AppliedOverride>,
    /// `None` when the policy has no lock bit.
    pub lock_retention: Option<LockRetention>,
    pub dashboard_key: Option<DashboardKey>,
    /// The loop-back lock handler is built.
    pub loop_back_signal: bool,
}

/// Maps a set of flags that already obeys [`OVERRIDE_RULES`] to a policy.
///
/// `key` is only consulted by the static password policies.
pub fn select_policy(
    flags: &SecurityFlags,
    key: Option<&str>,
) -> Result<SecurityPolicy, PolicyError> {
    check_exclusive(flags)?;
    if flags.debug_override {
        return Ok(SecurityPolicy::OpenDebug);
    }
    let static_key = || -> Result<PasswordKey, PolicyError> {
        let key = key.ok_or(PolicyError::MissingPasswordKey)?;
        PasswordKey::encode(key).map_err(PolicyError::InvalidPasswordKey)
    };
    let policy = match (flags.lock_bit(), flags.password, flags.password_random) {
        (true, false, false) => SecurityPolicy::LockBitOnly,
        (true, true, _) => SecurityPolicy::LockBitWithStaticPassword { key: static_key()? },
        (false, true, _) => SecurityPolicy::StaticPasswordOnly { key: static_key()? },
        (false, false, true) => SecurityPolicy::RandomPasswordSoftwareCompare,
        (true, false, true) => SecurityPolicy::LockBitWithRandomPassword,
        (false, false, false) => return Err(PolicyError::NoPolicySelected),
    };
    Ok(policy)
}

fn check_exclusive(flags: &SecurityFlags) -> Result<(), PolicyError> {
    for rule in OVERRIDE_RULES.iter() {
        if !flags.get(rule.trigger) {
            continue;
        }
        if let Some(&other) = rule.clears.iter().find(|flag| flags.get(**flag)) {
            return Err(PolicyError::ContradictoryFlags(rule.trigger, other));
        }
    }
    Ok(())
}

/// Resolves the configuration into the single policy the gate is built with.
///
/// # Error
///
/// * `PolicyError` - the configuration cannot be turned into a gate
pub fn resolve(config: &SecurityConfig) -> Result<ResolvedPolicy, PolicyError> {
    let mut flags = SecurityFlags::from_config(config);
    let overrides = apply_overrides(&mut flags);
    for o in overrides.iter() {
        tracing::warn!(
            trigger = %o.trigger,
            cleared = %o.cleared,
            "security flag forced off by override"
        );
    }

    let policy = select_policy(&flags, config.jtag_password_key.as_deref())?;
    let lock_retention = match (flags.lock_firmware, flags.lock_overlap) {
        (true, _) => Some(LockRetention::SurvivesReset),
        (false, true) => Some(LockRetention::ClearedOnReset),
        (false, false) => None,
    };
    let dashboard_key = config
        .admin_dashboard_key
        .as_deref()
        .map(str::parse::<DashboardKey>)
        .transpose()?;

    tracing::info!(%policy, ?lock_retention, "resolved JTAG security policy");
    Ok(ResolvedPolicy {
        policy,
        flags,
        overrides,
        lock_retention,
        dashboard_key,
        loop_back_signal: config.loop_back_signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bits: u32, key: Option<&str>) -> SecurityConfig {
        SecurityConfig {
            debug_override: bits & 1 != 0,
            jtag_lock_overlap: bits & 2 != 0,
            jtag_lock_firmware: bits & 4 != 0,
            jtag_password: bits & 8 != 0,
            jtag_password_random: bits & 16 != 0,
            jtag_password_key: key.map(str::to_owned),
            admin_dashboard_key: None,
            loop_back_signal: false,
        }
    }

    fn only(flags: &[SecurityFlag]) -> SecurityFlags {
        let mut result = SecurityFlags::default();
        for flag in flags {
            result.set(*flag, true);
        }
        result
    }

    #[test]
    fn test_debug_override_always_wins() {
        for bits in 0..32 {
            for key in [None, Some("pass"), Some("bad")] {
                let config = config(bits | 1, key);
                let resolved = resolve(&config).unwrap();
                assert_eq!(resolved.policy, SecurityPolicy::OpenDebug);
                assert_eq!(resolved.flags, only(&[SecurityFlag::DebugOverride]));
                assert_eq!(resolved.lock_retention, None);
                let cleared: Vec<_> = resolved.overrides.iter().map(|o| o.cleared).collect();
                let requested: Vec<_> = SecurityFlags::from_config(&config)
                    .enabled()
                    .filter(|f| *f != SecurityFlag::DebugOverride)
                    .collect();
                assert_eq!(cleared, requested);
            }
        }
    }

    #[test]
    fn test_all_flag_combinations() {
        let key = PasswordKey::encode("pass").unwrap();
        for bits in 0..64 {
            let with_key = bits & 32 != 0;
            let config = config(bits & 31, with_key.then_some("pass"));
            let debug = config.debug_override;
            let firmware = config.jtag_lock_firmware;
            let overlap = config.jtag_lock_overlap && !firmware;
            let random = config.jtag_password_random && !firmware;
            let password = config.jtag_password && !random;

            let expected = if debug {
                Ok(SecurityPolicy::OpenDebug)
            } else {
                match (overlap || firmware, password, random) {
                    (_, true, _) if !with_key => Err(PolicyError::MissingPasswordKey),
                    (true, true, _) => Ok(SecurityPolicy::LockBitWithStaticPassword { key }),
                    (false, true, _) => Ok(SecurityPolicy::StaticPasswordOnly { key }),
                    (true, false, true) => Ok(SecurityPolicy::LockBitWithRandomPassword),
                    (false, false, true) => Ok(SecurityPolicy::RandomPasswordSoftwareCompare),
                    (true, false, false) => Ok(SecurityPolicy::LockBitOnly),
                    (false, false, false) => Err(PolicyError::NoPolicySelected),
                }
            };
            let resolved = resolve(&config).map(|r| r.policy);
            assert_eq!(resolved, expected, "flags {:#07b}", bits);
        }
    }

    #[test]
    fn test_pairwise_overrides() {
        for (i, &a) in SecurityFlag::ALL.iter().enumerate() {
            for &b in SecurityFlag::ALL[i + 1..].iter() {
                let mut flags = only(&[a, b]);
                let applied = apply_overrides(&mut flags);

                let a_clears_b = OVERRIDE_RULES
                    .iter()
                    .any(|r| r.trigger == a && r.clears.contains(&b));
                let b_clears_a = OVERRIDE_RULES
                    .iter()
                    .any(|r| r.trigger == b && r.clears.contains(&a));
                assert!(!(a_clears_b && b_clears_a), "{a} and {b} clear each other");

                assert_eq!(flags.get(a), !b_clears_a, "{a} with {b}");
                assert_eq!(flags.get(b), !a_clears_b, "{b} with {a}");
                assert_eq!(applied.len(), (a_clears_b || b_clears_a) as usize);
                assert!(check_exclusive(&flags).is_ok());
            }
        }
    }

    #[test]
    fn test_override_order() {
        // The firmware lock removes the random password before it can remove
        // the static one.
        let mut flags = only(&[
            SecurityFlag::LockFirmware,
            SecurityFlag::Password,
            SecurityFlag::PasswordRandom,
        ]);
        let applied = apply_overrides(&mut flags);
        assert_eq!(
            applied,
            vec![AppliedOverride {
                trigger: SecurityFlag::LockFirmware,
                cleared: SecurityFlag::PasswordRandom,
            }]
        );
        assert_eq!(
            flags,
            only(&[SecurityFlag::LockFirmware, SecurityFlag::Password])
        );
    }

    #[test]
    fn test_select_policy_rejects_unresolved_flags() {
        let flags = only(&[SecurityFlag::Password, SecurityFlag::PasswordRandom]);
        assert_eq!(
            select_policy(&flags, Some("pass")),
            Err(PolicyError::ContradictoryFlags(
                SecurityFlag::PasswordRandom,
                SecurityFlag::Password
            ))
        );
        let flags = only(&[SecurityFlag::DebugOverride, SecurityFlag::LockOverlap]);
        assert!(matches!(
            select_policy(&flags, None),
            Err(PolicyError::ContradictoryFlags(SecurityFlag::DebugOverride, _))
        ));
    }

    #[test]
    fn test_static_key_errors() {
        let err = resolve(&config(8, Some("password"))).unwrap_err();
        assert_eq!(
            err,
            PolicyError::InvalidPasswordKey(PasswordError::WrongLength { len: 8 })
        );
        assert!(err.to_string().contains("jtag_password_key"));

        assert_eq!(resolve(&config(8, None)), Err(PolicyError::MissingPasswordKey));
        // Unused keys are never validated.
        assert_eq!(
            resolve(&config(2, Some(""))).map(|r| r.policy),
            Ok(SecurityPolicy::LockBitOnly)
        );
    }

    #[test]
    fn test_lock_retention() {
        assert_eq!(
            resolve(&config(2, None)).unwrap().lock_retention,
            Some(LockRetention::ClearedOnReset)
        );
        let resolved = resolve(&config(2 | 4, None)).unwrap();
        assert_eq!(resolved.lock_retention, Some(LockRetention::SurvivesReset));
        assert!(!resolved.flags.lock_overlap);
        assert_eq!(resolve(&config(16, None)).unwrap().lock_retention, None);
    }

    #[test]
    fn test_dashboard_key() {
        let mut config = config(2, None);
        config.admin_dashboard_key = Some("c0de".into());
        let resolved = resolve(&config).unwrap();
        assert_eq!(resolved.dashboard_key.map(|k| k.value()), Some(0xc0de));

        config.admin_dashboard_key = Some("xyz".into());
        assert_eq!(
            resolve(&config),
            Err(PolicyError::InvalidDashboardKey(DashboardKeyError {
                key: "xyz".into()
            }))
        );
    }

    #[test]
    fn test_loop_back_signal() {
        let mut config = config(2, None);
        assert!(!resolve(&config).unwrap().loop_back_signal);
        config.loop_back_signal = true;
        assert!(resolve(&config).unwrap().loop_back_signal);
        // The debug override leaves the lock handler alone.
        config.debug_override = true;
        let resolved = resolve(&config).unwrap();
        assert_eq!(resolved.policy, SecurityPolicy::OpenDebug);
        assert!(resolved.loop_back_signal);
    }

    #[test]
    fn test_policy_properties() {
        let key = PasswordKey::encode("pass").unwrap();
        let policy = SecurityPolicy::LockBitWithStaticPassword { key };
        assert!(policy.uses_lock_bit() && policy.uses_password());
        assert!(!policy.uses_soft_reference());
        assert_eq!(policy.bit_order(), Some(BitOrder::MsbFirst));
        assert_eq!(policy.to_string(), "LockBitWithStaticPassword (key 0x70617373)");

        let policy = SecurityPolicy::LockBitWithRandomPassword;
        assert_eq!(policy.bit_order(), Some(BitOrder::LsbFirst));
        assert_eq!(policy.soft_reference_mask(), 0x7fff_ffff);
        assert_eq!(
            SecurityPolicy::RandomPasswordSoftwareCompare.soft_reference_mask(),
            u32::MAX
        );

        let policy = SecurityPolicy::OpenDebug;
        assert!(!policy.uses_lock_bit() && !policy.uses_password());
        assert_eq!(policy.static_key(), None);
    }
}
