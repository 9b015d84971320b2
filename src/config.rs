use anyhow::{bail, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::motion::{EstimateOptions, MaxLengthRule};
use crate::pose::PartIndex;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MotionConfig {
    /// ファズ補間の参照範囲（フレーム数）
    #[serde(default = "default_fuzz_range")]
    pub fuzz_range: usize,
    /// 左右入れ替わり抑制を行うか
    #[serde(default = "default_anti_crossing")]
    pub anti_crossing: bool,
    /// ズーム再推定を行うか
    #[serde(default)]
    pub zoom: bool,
    /// ズームのヒント参照範囲
    #[serde(default = "default_zoom_range")]
    pub zoom_range: usize,
    /// 何フレームごとにズーム再推定するか
    #[serde(default = "default_zoom_rate")]
    pub zoom_rate: usize,
    /// 接続の最大長制約。パーツ名は "neck" "shoulder_r" など
    #[serde(default)]
    pub max_lengths: Vec<MaxLengthConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaxLengthConfig {
    pub from: String,
    pub to: String,
    pub max_length: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// これを下回る接続スコアを「見逃した動き」の候補とする
    #[serde(default = "default_missed_move_threshold")]
    pub missed_move_threshold: u8,
}

fn default_fuzz_range() -> usize { 10 }
fn default_anti_crossing() -> bool { true }
fn default_zoom_range() -> usize { 1 }
fn default_zoom_rate() -> usize { 1 }
fn default_missed_move_threshold() -> u8 { 64 }

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            fuzz_range: default_fuzz_range(),
            anti_crossing: default_anti_crossing(),
            zoom: false,
            zoom_range: default_zoom_range(),
            zoom_rate: default_zoom_rate(),
            max_lengths: Vec::new(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            missed_move_threshold: default_missed_move_threshold(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl MotionConfig {
    /// 推定器へ渡すオプションに変換する。未知のパーツ名はエラー
    pub fn to_options(&self) -> Result<EstimateOptions> {
        let mut max_lengths = Vec::with_capacity(self.max_lengths.len());
        for rule in &self.max_lengths {
            let Some(from) = PartIndex::from_name(&rule.from) else {
                bail!("unknown body part name: {}", rule.from);
            };
            let Some(to) = PartIndex::from_name(&rule.to) else {
                bail!("unknown body part name: {}", rule.to);
            };
            max_lengths.push(MaxLengthRule {
                from,
                to,
                max_length: rule.max_length,
            });
        }

        Ok(EstimateOptions {
            fuzz_range: self.fuzz_range,
            max_lengths,
            anti_crossing: self.anti_crossing,
            zoom: self.zoom,
            zoom_range: self.zoom_range,
            zoom_rate: self.zoom_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.motion.fuzz_range, 10);
        assert!(config.motion.anti_crossing);
        assert!(!config.motion.zoom);
        assert_eq!(config.motion.zoom_rate, 1);
        assert_eq!(config.scoring.missed_move_threshold, 64);
    }

    #[test]
    fn test_full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [motion]
            fuzz_range = 5
            anti_crossing = false
            zoom = true
            zoom_range = 2
            zoom_rate = 3

            [[motion.max_lengths]]
            from = "neck"
            to = "nose"
            max_length = 0.25

            [scoring]
            missed_move_threshold = 80
            "#,
        )
        .unwrap();

        assert_eq!(config.motion.fuzz_range, 5);
        assert!(config.motion.zoom);
        assert_eq!(config.scoring.missed_move_threshold, 80);

        let options = config.motion.to_options().unwrap();
        assert_eq!(options.zoom_rate, 3);
        assert_eq!(options.max_lengths.len(), 1);
        assert_eq!(options.max_lengths[0].from, PartIndex::Neck);
        assert_eq!(options.max_lengths[0].to, PartIndex::Nose);
    }

    #[test]
    fn test_unknown_part_name_is_error() {
        let config: Config = toml::from_str(
            r#"
            [[motion.max_lengths]]
            from = "neck"
            to = "tail"
            max_length = 0.25
            "#,
        )
        .unwrap();
        assert!(config.motion.to_options().is_err());
    }
}
