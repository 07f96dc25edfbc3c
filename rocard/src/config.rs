//! Card configuration files and the configurator that applies them.
//!
//! The format is a flat INI dialect consumed by operations tooling:
//!
//! ```ini
//! [cru]
//! clock=local
//! datapathmode=packet
//! gbtmode=gbt
//! downstreamdata=ctp
//! loopback=false
//! ponupstream=false
//! onuaddress=0x0
//! cruid=0x0
//! allowrejection=false
//!
//! [links]
//! enabled=false
//! gbtmux=ttc
//!
//! [link3]
//! enabled=true
//! gbtmux=ddg
//! ```
//!
//! The `[links]` section sets the default for every link; `[link<N>]`
//! sections override per link. Paths handed to the configurator must carry
//! a `file:` prefix. Enumeration values are case-insensitive tokens from
//! the fixed sets in [`crate::types`]. Parsing and re-emitting a file
//! yields the same parameters (the round-trip law the tooling relies on).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use crate::bar::Bar;
use crate::cru::MAX_LINKS;
use crate::error::{Error, Result};
use crate::factory::ChannelFactory;
use crate::parameters::{CardId, Parameters};
use crate::types::{Clock, DatapathMode, DownstreamData, GbtMode, GbtMux};

/// Required prefix of configuration URIs.
const FILE_PREFIX: &str = "file:";

/// Parses a `file:`-prefixed configuration URI into [`Parameters`].
///
/// # Errors
///
/// `Config` for a missing prefix, unknown sections or keys, or invalid
/// values; `Io` when the file cannot be read.
pub fn parse_config_uri(uri: &str) -> Result<Parameters> {
    let Some(path) = uri.strip_prefix(FILE_PREFIX) else {
        return Err(Error::Config(format!(
            "configuration path must start with {FILE_PREFIX:?}, got {uri:?}"
        )));
    };
    let text = std::fs::read_to_string(Path::new(path)).map_err(|source| Error::Io {
        operation: "reading configuration file",
        source,
    })?;
    parse_config(&text)
}

/// Parses configuration text into [`Parameters`].
///
/// # Errors
///
/// `Config` on syntax or content errors.
pub fn parse_config(text: &str) -> Result<Parameters> {
    let sections = split_sections(text)?;

    let mut params = Parameters::new();
    let mut default_enabled = false;
    let mut default_mux = GbtMux::Ttc;
    let mut link_overrides: BTreeMap<u32, (Option<bool>, Option<GbtMux>)> = BTreeMap::new();

    for (section, entries) in &sections {
        match section.as_str() {
            "cru" => {
                for (key, value) in entries {
                    apply_cru_key(&mut params, key, value)?;
                }
            }
            "links" => {
                for (key, value) in entries {
                    match key.as_str() {
                        "enabled" => default_enabled = parse_bool(value)?,
                        "gbtmux" => default_mux = value.parse()?,
                        other => {
                            return Err(Error::Config(format!(
                                "unknown key {other:?} in section [links]"
                            )))
                        }
                    }
                }
            }
            link if link.starts_with("link") => {
                let id: u32 = link[4..].parse().map_err(|_| {
                    Error::Config(format!("invalid link section name [{link}]"))
                })?;
                if id >= MAX_LINKS {
                    return Err(Error::Config(format!(
                        "link {id} is beyond the card's {MAX_LINKS} links"
                    )));
                }
                let entry = link_overrides.entry(id).or_default();
                for (key, value) in entries {
                    match key.as_str() {
                        "enabled" => entry.0 = Some(parse_bool(value)?),
                        "gbtmux" => entry.1 = Some(value.parse()?),
                        other => {
                            return Err(Error::Config(format!(
                                "unknown key {other:?} in section [{link}]"
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(Error::Config(format!("unknown section [{other}]")));
            }
        }
    }

    // Resolve the per-link picture.
    let mut link_mask = BTreeSet::new();
    let mut mux_map = BTreeMap::new();
    for id in 0..MAX_LINKS {
        let (enabled_override, mux_override) =
            link_overrides.get(&id).copied().unwrap_or((None, None));
        if enabled_override.unwrap_or(default_enabled) {
            link_mask.insert(id);
            mux_map.insert(id, mux_override.unwrap_or(default_mux));
        }
    }
    params = params
        .set_link_mask(link_mask)
        .set_gbt_mux(default_mux)
        .set_gbt_mux_map(mux_map);
    Ok(params)
}

/// Emits configuration text that parses back to `params`.
#[must_use]
pub fn emit_config(params: &Parameters) -> String {
    let mut out = String::new();
    out.push_str("[cru]\n");
    let mut key = |name: &str, value: String| {
        let _ = writeln!(out, "{name}={value}");
    };
    key(
        "clock",
        params.clock().copied().unwrap_or(Clock::Local).to_string(),
    );
    key(
        "datapathmode",
        params
            .datapath_mode()
            .copied()
            .unwrap_or(DatapathMode::Packet)
            .to_string(),
    );
    key(
        "gbtmode",
        params.gbt_mode().copied().unwrap_or(GbtMode::Gbt).to_string(),
    );
    key(
        "downstreamdata",
        params
            .downstream_data()
            .copied()
            .unwrap_or(DownstreamData::Ctp)
            .to_string(),
    );
    key(
        "loopback",
        params
            .link_loopback_enabled()
            .copied()
            .unwrap_or(false)
            .to_string(),
    );
    key(
        "ponupstream",
        params.pon_upstream().copied().unwrap_or(false).to_string(),
    );
    key(
        "onuaddress",
        format!("0x{:x}", params.onu_address().copied().unwrap_or(0)),
    );
    key(
        "cruid",
        format!("0x{:x}", params.cru_id().copied().unwrap_or(0)),
    );
    key(
        "allowrejection",
        params
            .allow_rejection()
            .copied()
            .unwrap_or(false)
            .to_string(),
    );

    let default_mux = params.gbt_mux().copied().unwrap_or(GbtMux::Ttc);
    let _ = write!(out, "\n[links]\nenabled=false\ngbtmux={default_mux}\n");

    if let Some(mask) = params.link_mask() {
        let empty = BTreeMap::new();
        let mux_map = params.gbt_mux_map().unwrap_or(&empty);
        for id in mask {
            let mux = mux_map.get(id).copied().unwrap_or(default_mux);
            let _ = write!(out, "\n[link{id}]\nenabled=true\ngbtmux={mux}\n");
        }
    }
    out
}

/// Splits INI text into `(section, [(key, value)])`, lower-casing keys and
/// section names and dropping comments.
fn split_sections(text: &str) -> Result<Vec<(String, Vec<(String, String)>)>> {
    let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push((name.trim().to_ascii_lowercase(), Vec::new()));
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Config(format!(
                "line {}: expected key=value, got {line:?}",
                number + 1
            )));
        };
        let Some((_, entries)) = sections.last_mut() else {
            return Err(Error::Config(format!(
                "line {}: key outside of any section",
                number + 1
            )));
        };
        entries.push((
            key.trim().to_ascii_lowercase(),
            value.trim().to_string(),
        ));
    }
    Ok(sections)
}

fn apply_cru_key(params: &mut Parameters, key: &str, value: &str) -> Result<()> {
    let taken = std::mem::take(params);
    *params = match key {
        "clock" => taken.set_clock(value.parse()?),
        "datapathmode" => taken.set_datapath_mode(value.parse()?),
        "gbtmode" => taken.set_gbt_mode(value.parse()?),
        "downstreamdata" => taken.set_downstream_data(value.parse()?),
        "loopback" => taken.set_link_loopback_enabled(parse_bool(value)?),
        "ponupstream" => taken.set_pon_upstream(parse_bool(value)?),
        "onuaddress" => taken.set_onu_address(parse_number(value)?),
        "cruid" => taken.set_cru_id(parse_number(value)? as u16),
        "allowrejection" => taken.set_allow_rejection(parse_bool(value)?),
        other => {
            return Err(Error::Config(format!(
                "unknown key {other:?} in section [cru]"
            )))
        }
    };
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::Config(format!("invalid boolean {other:?}"))),
    }
}

fn parse_number(value: &str) -> Result<u32> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| Error::Config(format!("invalid number {value:?}")))
}

/// Applies a configuration file to a card through its BAR 2.
#[derive(Debug)]
pub struct CardConfigurator {
    params: Parameters,
    force: bool,
}

impl CardConfigurator {
    /// Builds a configurator for `card_id` from a `file:` URI.
    ///
    /// # Errors
    ///
    /// Parse and I/O errors from the configuration file.
    pub fn from_uri(card_id: CardId, uri: &str, force: bool) -> Result<Self> {
        let params = parse_config_uri(uri)?
            .set_card_id(card_id)
            // Bring-up talks to BAR 2.
            .set_channel_number(2);
        Ok(Self { params, force })
    }

    /// Builds a configurator from already-assembled parameters.
    #[must_use]
    pub fn from_parameters(params: Parameters, force: bool) -> Self {
        Self { params, force }
    }

    /// The parameters this configurator will apply.
    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Opens the BAR and runs `configure` (forced) or `reconfigure`.
    ///
    /// # Errors
    ///
    /// Factory and bring-up errors.
    pub fn apply(&self) -> Result<()> {
        let bar = ChannelFactory.obtain_bar(&self.params)?;
        self.apply_to(&bar)
    }

    /// Runs the bring-up against an already-open BAR.
    ///
    /// # Errors
    ///
    /// Bring-up errors.
    pub fn apply_to(&self, bar: &Bar) -> Result<()> {
        if self.force {
            bar.configure()
        } else {
            bar.reconfigure()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SerialId;

    const SAMPLE: &str = "\
# Example card setup
[cru]
clock=TTC
datapathmode=packet
gbtmode=wb
downstreamdata=ctp
loopback=false
ponupstream=true
onuaddress=0x2a
cruid=0x7
allowrejection=false

[links]
enabled=false
gbtmux=ttc

[link0]
enabled=true
gbtmux=ddg

[link11]
enabled=true
";

    #[test]
    fn parse_reads_every_section() {
        let params = parse_config(SAMPLE).unwrap();
        assert_eq!(params.clock(), Some(&Clock::Ttc));
        assert_eq!(params.gbt_mode(), Some(&GbtMode::Wb));
        assert_eq!(params.pon_upstream(), Some(&true));
        assert_eq!(params.onu_address(), Some(&0x2a));
        assert_eq!(params.cru_id(), Some(&0x7));

        let mask = params.link_mask().unwrap();
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![0, 11]);
        let mux_map = params.gbt_mux_map().unwrap();
        assert_eq!(mux_map.get(&0), Some(&GbtMux::Ddg));
        // Link 11 falls back to the [links] default.
        assert_eq!(mux_map.get(&11), Some(&GbtMux::Ttc));
    }

    #[test]
    fn emit_then_parse_is_identity() {
        let params = parse_config(SAMPLE).unwrap();
        let emitted = emit_config(&params);
        let reparsed = parse_config(&emitted).unwrap();
        assert_eq!(params, reparsed);
    }

    #[test]
    fn uri_requires_file_prefix() {
        assert!(matches!(
            parse_config_uri("/etc/rocard.cfg"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn uri_parses_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.cfg");
        std::fs::write(&path, SAMPLE).unwrap();
        let uri = format!("file:{}", path.display());
        let params = parse_config_uri(&uri).unwrap();
        assert_eq!(params.clock(), Some(&Clock::Ttc));
    }

    #[test]
    fn unknown_keys_and_sections_are_rejected() {
        assert!(matches!(
            parse_config("[cru]\nfrequency=40\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_config("[power]\nwatts=25\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_config("[link99]\nenabled=true\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(parse_config("orphan=1\n"), Err(Error::Config(_))));
    }

    #[test]
    fn values_are_case_insensitive() {
        let params = parse_config("[cru]\nclock=LoCaL\n").unwrap();
        assert_eq!(params.clock(), Some(&Clock::Local));
    }

    #[test]
    fn configurator_applies_to_dummy() {
        let params = Parameters::for_channel(CardId::Serial(SerialId::new(-1, 0)), 2);
        let configurator = CardConfigurator::from_parameters(params, true);
        configurator.apply().unwrap();
    }
}
