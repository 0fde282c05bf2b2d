use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use surge_core::{RunOptions, Stage, ThresholdSet};

use crate::scenarios::ScenarioKind;

pub(crate) const BUILTIN_PLAN: &str = include_str!("../plans/pr-review.yaml");

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanYaml {
    scenario: String,

    #[serde(rename = "startVUs", default)]
    start_vus: u64,

    stages: Vec<StageYaml>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(default)]
    options: OptionsYaml,

    #[serde(default, deserialize_with = "deserialize_env")]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StageYaml {
    duration: YamlDuration,
    target: u64,
    /// Restates the VU count the stage starts from.
    #[serde(default)]
    start: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OptionsYaml {
    #[serde(default)]
    abort_on_fail: Option<bool>,
    #[serde(default)]
    control_tick: Option<YamlDuration>,
    #[serde(default)]
    percentile_sketch_precision: Option<u8>,
    #[serde(default)]
    graceful_stop: Option<YamlDuration>,
    #[serde(default)]
    abort_eval_delay: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default)]
struct YamlDuration(Duration);

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw.unwrap_or_default() {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => {
                return Err(serde::de::Error::custom(format!(
                    "env `{k}` must be a scalar"
                )));
            }
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// A validated run plan: which scenario to run and how to drive it.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub scenario: ScenarioKind,
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<ThresholdSet>,
    pub options: RunOptions,
    pub env: BTreeMap<String, String>,
}

impl Plan {
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_yaml_str(BUILTIN_PLAN).context("built-in plan is invalid")
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let doc: PlanYaml = serde_yaml::from_str(raw).context("failed to parse plan YAML")?;
        doc.try_into()
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }
}

impl TryFrom<PlanYaml> for Plan {
    type Error = anyhow::Error;

    fn try_from(doc: PlanYaml) -> anyhow::Result<Self> {
        let PlanYaml {
            scenario,
            start_vus,
            stages,
            thresholds,
            options,
            env,
        } = doc;

        let scenario: ScenarioKind = scenario.parse().map_err(|_| {
            anyhow::anyhow!(
                "unknown scenario `{scenario}` (available: {})",
                ScenarioKind::names().join(", ")
            )
        })?;

        if stages.is_empty() {
            anyhow::bail!("plan has no stages");
        }
        let stages = stages
            .into_iter()
            .map(|s| {
                let stage = Stage::new(s.duration.0, s.target);
                match s.start {
                    Some(start) => stage.with_start(start),
                    None => stage,
                }
            })
            .collect();

        let thresholds = thresholds
            .into_iter()
            .map(|(metric, exprs)| {
                let expressions = match exprs {
                    ThresholdExprYaml::One(s) => vec![s],
                    ThresholdExprYaml::Many(v) => v,
                };
                if expressions.is_empty() {
                    anyhow::bail!("invalid thresholds for `{metric}`: empty list");
                }
                Ok(ThresholdSet::new(metric, expressions))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let defaults = RunOptions::default();
        let options = RunOptions {
            abort_on_fail: options.abort_on_fail.unwrap_or(defaults.abort_on_fail),
            control_tick: options
                .control_tick
                .map_or(defaults.control_tick, |d| d.0),
            percentile_sketch_precision: options
                .percentile_sketch_precision
                .unwrap_or(defaults.percentile_sketch_precision),
            graceful_stop: options.graceful_stop.map(|d| d.0).or(defaults.graceful_stop),
            abort_eval_delay: options
                .abort_eval_delay
                .map_or(defaults.abort_eval_delay, |d| d.0),
        };

        Ok(Self {
            scenario,
            start_vus,
            stages,
            thresholds,
            options,
            env,
        })
    }
}

pub(crate) async fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read plan: {}", path.display()))?;
    Plan::from_yaml_str(&raw).with_context(|| format!("invalid plan: {}", path.display()))
}
