use std::collections::HashSet;
use std::fmt;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::pmu::record::{EngineKind, MAX_PMU_COUNTERS};

/// How a metric value is computed from its counter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFormula {
    /// `counter / total_cycle`.
    Ratio,
    /// `counter / total_cycle * total_time`, in microseconds.
    Time,
    /// `counter * 64 bytes / total_time`, in GB/s.
    Bandwidth,
    /// The raw counter value.
    Raw,
}

impl MetricFormula {
    /// Picks the formula from the metric name's suffix.
    pub fn for_name(name: &str) -> Self {
        if name.ends_with("_ratio") {
            Self::Ratio
        } else if name.ends_with("_time") {
            Self::Time
        } else if name.ends_with("_bw") {
            Self::Bandwidth
        } else {
            Self::Raw
        }
    }
}

/// One named metric bound to a counter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: String,
    pub counter: usize,
    pub formula: MetricFormula,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, counter: usize) -> Self {
        let name = name.into();
        let formula = MetricFormula::for_name(&name);
        Self {
            name,
            counter,
            formula,
        }
    }
}

/// A metric as written in configuration: a bare name bound by position, or
/// an explicit `{name, counter}` binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MetricEntry {
    Name(String),
    Bound { name: String, counter: usize },
}

/// Built-in metric selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePreset {
    PipeUtilization,
    Memory,
    ArithmeticUtilization,
}

impl ProfilePreset {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PipeUtilization => "pipe_utilization",
            Self::Memory => "memory",
            Self::ArithmeticUtilization => "arithmetic_utilization",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pipe_utilization" => Some(Self::PipeUtilization),
            "memory" => Some(Self::Memory),
            "arithmetic_utilization" => Some(Self::ArithmeticUtilization),
            _ => None,
        }
    }

    /// `(metric name, counter slot)` pairs for one engine.
    pub fn metrics(self, engine: EngineKind) -> &'static [(&'static str, usize)] {
        match (self, engine) {
            (Self::PipeUtilization, EngineKind::Aic) => &[
                ("mac_time", 1),
                ("mac_ratio", 1),
                ("scalar_time", 2),
                ("scalar_ratio", 2),
                ("mte1_time", 3),
                ("mte1_ratio", 3),
                ("mte2_time", 4),
                ("mte2_ratio", 4),
                ("fixpipe_time", 5),
                ("fixpipe_ratio", 5),
                ("icache_miss_ratio", 6),
            ],
            (Self::PipeUtilization, EngineKind::Aiv) => &[
                ("vec_time", 0),
                ("vec_ratio", 0),
                ("scalar_time", 2),
                ("scalar_ratio", 2),
                ("mte2_time", 4),
                ("mte2_ratio", 4),
                ("mte3_time", 5),
                ("mte3_ratio", 5),
                ("icache_miss_ratio", 6),
            ],
            (Self::Memory, EngineKind::Aic) => &[
                ("main_mem_read_bw", 0),
                ("main_mem_write_bw", 1),
                ("l2_read_bw", 2),
                ("l2_write_bw", 3),
                ("mte1_ratio", 4),
                ("mte2_ratio", 5),
                ("mte3_ratio", 6),
            ],
            (Self::Memory, EngineKind::Aiv) => &[
                ("ub_read_bw", 0),
                ("ub_write_bw", 1),
                ("l2_read_bw", 2),
                ("l2_write_bw", 3),
                ("mte2_ratio", 5),
                ("mte3_ratio", 6),
            ],
            (Self::ArithmeticUtilization, EngineKind::Aic) => &[
                ("cube_fp16_ratio", 0),
                ("cube_int8_ratio", 1),
                ("cube_fp32_ratio", 2),
                ("cube_fops", 6),
            ],
            (Self::ArithmeticUtilization, EngineKind::Aiv) => &[
                ("vec_fp32_ratio", 0),
                ("vec_fp16_ratio", 1),
                ("vec_int32_ratio", 2),
                ("vec_misc_ratio", 3),
                ("vector_fops", 7),
            ],
        }
    }
}

impl fmt::Display for ProfilePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered metric selections for both engines. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricProfile {
    pub aic: Vec<MetricSpec>,
    pub aiv: Vec<MetricSpec>,
}

impl MetricProfile {
    pub fn from_preset(preset: ProfilePreset) -> Self {
        let specs = |engine| {
            preset
                .metrics(engine)
                .iter()
                .map(|(name, counter)| MetricSpec::new(*name, *counter))
                .collect()
        };
        Self {
            aic: specs(EngineKind::Aic),
            aiv: specs(EngineKind::Aiv),
        }
    }

    /// Builds a profile from a preset name, optionally replacing either
    /// engine's list with explicit entries.
    pub fn build(
        preset: &str,
        aic: Option<&[MetricEntry]>,
        aiv: Option<&[MetricEntry]>,
    ) -> Result<Self> {
        let Some(preset) = ProfilePreset::from_name(preset) else {
            bail!("unknown metric profile preset: {preset}");
        };
        let mut profile = Self::from_preset(preset);

        if let Some(entries) = aic {
            profile.aic = specs_from_entries(EngineKind::Aic, entries)?;
        }
        if let Some(entries) = aiv {
            profile.aiv = specs_from_entries(EngineKind::Aiv, entries)?;
        }

        Ok(profile)
    }

    pub fn metrics(&self, engine: EngineKind) -> &[MetricSpec] {
        match engine {
            EngineKind::Aic => &self.aic,
            EngineKind::Aiv => &self.aiv,
        }
    }
}

fn specs_from_entries(engine: EngineKind, entries: &[MetricEntry]) -> Result<Vec<MetricSpec>> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(entries.len());

    for (position, entry) in entries.iter().enumerate() {
        let (name, counter) = match entry {
            MetricEntry::Name(name) => (name.as_str(), position),
            MetricEntry::Bound { name, counter } => (name.as_str(), *counter),
        };

        if name.is_empty() {
            bail!("{engine} metric at position {position} has an empty name");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("{engine} metric name must be [A-Za-z0-9_]: {name}");
        }
        if counter >= MAX_PMU_COUNTERS {
            bail!(
                "{engine} metric {name} binds counter {counter}, at most {} are recorded",
                MAX_PMU_COUNTERS
            );
        }
        if !seen.insert(name) {
            bail!("{engine} metric appears more than once: {name}");
        }

        specs.push(MetricSpec::new(name, counter));
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names_match_their_formula() {
        for preset in [
            ProfilePreset::PipeUtilization,
            ProfilePreset::Memory,
            ProfilePreset::ArithmeticUtilization,
        ] {
            for engine in [EngineKind::Aic, EngineKind::Aiv] {
                for (name, _) in preset.metrics(engine) {
                    if MetricFormula::for_name(name) == MetricFormula::Raw {
                        assert!(name.ends_with("_fops"), "{preset}: {name} has no formula suffix");
                    }
                }
            }
        }
        let aic = ProfilePreset::PipeUtilization.metrics(EngineKind::Aic);
        assert!(aic.contains(&("icache_miss_ratio", 6)));
    }

    #[test]
    fn test_formula_from_suffix() {
        assert_eq!(MetricFormula::for_name("vec_ratio"), MetricFormula::Ratio);
        assert_eq!(MetricFormula::for_name("mac_time"), MetricFormula::Time);
        assert_eq!(MetricFormula::for_name("l2_read_bw"), MetricFormula::Bandwidth);
        assert_eq!(MetricFormula::for_name("cube_fops"), MetricFormula::Raw);
    }

    #[test]
    fn test_presets_resolve() {
        for name in ["pipe_utilization", "memory", "arithmetic_utilization"] {
            let preset = ProfilePreset::from_name(name).expect("known preset");
            assert_eq!(preset.as_str(), name);
            let profile = MetricProfile::from_preset(preset);
            assert!(!profile.aic.is_empty());
            assert!(!profile.aiv.is_empty());
        }
        assert!(ProfilePreset::from_name("l2_cache").is_none());
    }

    #[test]
    fn test_build_with_explicit_lists() {
        let aiv = vec![
            MetricEntry::Name("vec_ratio".to_string()),
            MetricEntry::Name("vec_time".to_string()),
            MetricEntry::Bound {
                name: "ub_read_bw".to_string(),
                counter: 9,
            },
        ];
        let profile = MetricProfile::build("memory", None, Some(&aiv)).unwrap();
        assert_eq!(profile.aic, MetricProfile::from_preset(ProfilePreset::Memory).aic);
        assert_eq!(
            profile.aiv,
            vec![
                MetricSpec::new("vec_ratio", 0),
                MetricSpec::new("vec_time", 1),
                MetricSpec::new("ub_read_bw", 9),
            ]
        );
    }

    #[test]
    fn test_build_rejects_bad_entries() {
        let err = MetricProfile::build("nope", None, None).unwrap_err();
        assert!(err.to_string().contains("unknown metric profile preset"));

        let dup = vec![
            MetricEntry::Name("a_ratio".to_string()),
            MetricEntry::Name("a_ratio".to_string()),
        ];
        let err = MetricProfile::build("memory", Some(&dup), None).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let wide = vec![MetricEntry::Bound {
            name: "x".to_string(),
            counter: 10,
        }];
        let err = MetricProfile::build("memory", Some(&wide), None).unwrap_err();
        assert!(err.to_string().contains("binds counter 10"));

        let quoted = vec![MetricEntry::Name("x'y".to_string())];
        assert!(MetricProfile::build("memory", None, Some(&quoted)).is_err());
    }

    #[test]
    fn test_metric_entry_yaml_forms() {
        let entries: Vec<MetricEntry> =
            serde_yaml::from_str("- vec_ratio\n- {name: l2_read_bw, counter: 3}\n").unwrap();
        assert_eq!(
            entries,
            vec![
                MetricEntry::Name("vec_ratio".to_string()),
                MetricEntry::Bound {
                    name: "l2_read_bw".to_string(),
                    counter: 3
                },
            ]
        );
    }
}
