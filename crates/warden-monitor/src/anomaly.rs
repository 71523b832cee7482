//! Anomaly detectors.
//!
//! Two variants: a statistical detector scoring single values against a
//! baseline series, and a behavioral detector scoring observation maps
//! against per-user per-feature profiles.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use warden_core::Metadata;

/// Numeric profiles keep this many recent observations.
const PROFILE_WINDOW: usize = 100;
/// A behavioral observation is anomalous above this overall score.
const BEHAVIORAL_THRESHOLD: f64 = 0.8;

/// Outcome of a detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub anomalous: bool,
    /// Scalar distance from the baseline, scaled by sensitivity
    pub score: f64,
    pub details: Metadata,
}

impl Detection {
    fn quiet(reason: &str) -> Self {
        Self {
            anomalous: false,
            score: 0.0,
            details: Metadata::from([("note".to_string(), json!(reason))]),
        }
    }
}

/// Z-score detector over a baseline series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalDetector {
    pub detector_id: String,
    pub name: String,
    pub description: String,
    /// Which event stream feeds this detector
    pub data_source: String,
    /// Adjusted scores above this fire
    pub threshold: f64,
    /// Multiplier applied to the raw z-score
    pub sensitivity: f64,
    baseline: Vec<f64>,
}

impl StatisticalDetector {
    pub fn new(
        detector_id: impl Into<String>,
        name: impl Into<String>,
        data_source: impl Into<String>,
        threshold: f64,
        sensitivity: f64,
    ) -> Self {
        Self {
            detector_id: detector_id.into(),
            name: name.into(),
            description: String::new(),
            data_source: data_source.into(),
            threshold,
            sensitivity,
            baseline: Vec::new(),
        }
    }

    pub fn add_baseline(&mut self, values: impl IntoIterator<Item = f64>) {
        self.baseline.extend(values);
    }

    pub fn baseline_len(&self) -> usize {
        self.baseline.len()
    }

    pub fn detect(&self, value: f64) -> Detection {
        if self.baseline.is_empty() {
            return Detection::quiet("no baseline data available");
        }
        let mean = mean(&self.baseline);
        let stdev = if self.baseline.len() > 1 {
            sample_stdev(&self.baseline, mean)
        } else {
            1.0
        };
        let z_score = if stdev == 0.0 {
            if value == mean { 0.0 } else { f64::INFINITY }
        } else {
            (value - mean).abs() / stdev
        };
        let score = z_score * self.sensitivity;
        Detection {
            anomalous: score > self.threshold,
            score,
            details: Metadata::from([
                ("mean".to_string(), json!(mean)),
                ("stdev".to_string(), json!(stdev)),
                ("z_score".to_string(), json!(z_score)),
                ("threshold".to_string(), json!(self.threshold)),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FeatureProfile {
    Numeric { values: VecDeque<f64> },
    Categorical { counts: HashMap<String, u64> },
}

/// Per-user behavioral baseline detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralDetector {
    pub detector_id: String,
    pub name: String,
    pub description: String,
    pub data_source: String,
    pub sensitivity: f64,
    profiles: HashMap<String, HashMap<String, FeatureProfile>>,
}

impl BehavioralDetector {
    pub fn new(
        detector_id: impl Into<String>,
        name: impl Into<String>,
        data_source: impl Into<String>,
        sensitivity: f64,
    ) -> Self {
        Self {
            detector_id: detector_id.into(),
            name: name.into(),
            description: String::new(),
            data_source: data_source.into(),
            sensitivity,
            profiles: HashMap::new(),
        }
    }

    /// Fold an observation into the user's profile. Numeric features keep
    /// the last 100 values; everything else becomes a frequency map.
    pub fn update_profile(&mut self, user_key: &str, observation: &Metadata) {
        let profile = self.profiles.entry(user_key.to_string()).or_default();
        for (feature, value) in observation {
            match value.as_f64() {
                Some(number) => {
                    let entry = profile
                        .entry(feature.clone())
                        .or_insert_with(|| FeatureProfile::Numeric {
                            values: VecDeque::new(),
                        });
                    if let FeatureProfile::Numeric { values } = entry {
                        values.push_back(number);
                        while values.len() > PROFILE_WINDOW {
                            values.pop_front();
                        }
                    }
                }
                None => {
                    let entry = profile
                        .entry(feature.clone())
                        .or_insert_with(|| FeatureProfile::Categorical {
                            counts: HashMap::new(),
                        });
                    if let FeatureProfile::Categorical { counts } = entry {
                        *counts.entry(categorical_key(value)).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    /// Score an observation: the overall score is the maximum per-feature
    /// score (z-score for numeric, `1 - relative_frequency` for
    /// categorical); anomalous above 0.8.
    pub fn detect(&self, user_key: &str, observation: &Metadata) -> Detection {
        let Some(profile) = self.profiles.get(user_key) else {
            return Detection::quiet("no user profile available");
        };

        let mut details = Metadata::new();
        let mut scores = Vec::new();
        for (feature, value) in observation {
            let Some(feature_profile) = profile.get(feature) else {
                continue;
            };
            match (feature_profile, value.as_f64()) {
                (FeatureProfile::Numeric { values }, Some(number)) => {
                    let series: Vec<f64> = values.iter().copied().collect();
                    let mean = mean(&series);
                    let stdev = if series.len() > 1 {
                        sample_stdev(&series, mean)
                    } else {
                        1.0
                    };
                    let z_score = if stdev == 0.0 {
                        if number == mean { 0.0 } else { f64::INFINITY }
                    } else {
                        (number - mean).abs() / stdev
                    };
                    let score = z_score * self.sensitivity;
                    scores.push(score);
                    details.insert(
                        feature.clone(),
                        json!({"type": "numeric", "mean": mean, "z_score": z_score, "score": score}),
                    );
                }
                (FeatureProfile::Categorical { counts }, _) => {
                    let total: u64 = counts.values().sum();
                    if total == 0 {
                        continue;
                    }
                    let seen = counts.get(&categorical_key(value)).copied().unwrap_or(0);
                    let frequency = seen as f64 / total as f64;
                    let score = (1.0 - frequency) * self.sensitivity;
                    scores.push(score);
                    details.insert(
                        feature.clone(),
                        json!({"type": "categorical", "frequency": frequency, "score": score}),
                    );
                }
                _ => {}
            }
        }

        let Some(overall) = scores.iter().copied().fold(None::<f64>, |best, score| {
            Some(best.map_or(score, |b| b.max(score)))
        }) else {
            return Detection::quiet("no matching behavior data for analysis");
        };
        Detection {
            anomalous: overall > BEHAVIORAL_THRESHOLD,
            score: overall,
            details,
        }
    }
}

/// Either detector variant, under one id space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyDetector {
    Statistical(StatisticalDetector),
    Behavioral(BehavioralDetector),
}

impl AnomalyDetector {
    pub fn detector_id(&self) -> &str {
        match self {
            Self::Statistical(d) => &d.detector_id,
            Self::Behavioral(d) => &d.detector_id,
        }
    }

    pub fn data_source(&self) -> &str {
        match self {
            Self::Statistical(d) => &d.data_source,
            Self::Behavioral(d) => &d.data_source,
        }
    }
}

fn categorical_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
fn sample_stdev(values: &[f64], mean: f64) -> f64 {
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistical_detector_flags_outliers() {
        let mut detector = StatisticalDetector::new("login-frequency", "Logins", "login_events", 2.5, 1.0);
        assert!(!detector.detect(100.0).anomalous); // no baseline yet

        detector.add_baseline([10.0, 11.0, 9.0, 10.0, 12.0, 8.0, 10.0, 11.0]);
        assert!(!detector.detect(10.5).anomalous);

        let detection = detector.detect(50.0);
        assert!(detection.anomalous);
        assert!(detection.score > 2.5);
    }

    #[test]
    fn zero_stdev_baseline() {
        let mut detector = StatisticalDetector::new("flat", "Flat", "events", 2.0, 1.0);
        detector.add_baseline([5.0, 5.0, 5.0]);
        assert!(!detector.detect(5.0).anomalous);
        let detection = detector.detect(6.0);
        assert!(detection.anomalous);
        assert!(detection.score.is_infinite());
    }

    #[test]
    fn sensitivity_scales_the_score() {
        let mut strict = StatisticalDetector::new("s", "S", "events", 2.0, 1.2);
        strict.add_baseline([10.0, 10.5, 9.5, 10.0, 10.2, 9.8]);
        let mut lax = strict.clone();
        lax.sensitivity = 0.5;

        let value = 12.0;
        assert!(strict.detect(value).score > lax.detect(value).score);
    }

    #[test]
    fn behavioral_detector_uses_max_feature_score() {
        let mut detector = BehavioralDetector::new("user-behavior", "Behavior", "user_actions", 1.0);
        for _ in 0..20 {
            detector.update_profile(
                "alice",
                &Metadata::from([
                    ("login_hour".to_string(), json!(9)),
                    ("country".to_string(), json!("DE")),
                ]),
            );
        }
        // A couple of off-hours logins widen the numeric profile a little
        detector.update_profile("alice", &Metadata::from([("login_hour".to_string(), json!(10))]));
        detector.update_profile("alice", &Metadata::from([("login_hour".to_string(), json!(8))]));

        // Usual behavior scores low
        let usual = detector.detect(
            "alice",
            &Metadata::from([
                ("login_hour".to_string(), json!(9)),
                ("country".to_string(), json!("DE")),
            ]),
        );
        assert!(!usual.anomalous);

        // A never-seen country rates 1.0 regardless of the hour
        let odd = detector.detect(
            "alice",
            &Metadata::from([
                ("login_hour".to_string(), json!(9)),
                ("country".to_string(), json!("KP")),
            ]),
        );
        assert!(odd.anomalous);
        assert!(odd.score > 0.99);
    }

    #[test]
    fn behavioral_detector_without_profile_is_quiet() {
        let detector = BehavioralDetector::new("d", "D", "events", 1.0);
        let detection = detector.detect("ghost", &Metadata::from([("x".to_string(), json!(1))]));
        assert!(!detection.anomalous);
        assert_eq!(detection.score, 0.0);
    }

    #[test]
    fn numeric_profile_keeps_the_last_hundred() {
        let mut detector = BehavioralDetector::new("d", "D", "events", 1.0);
        for i in 0..150 {
            detector.update_profile("u", &Metadata::from([("n".to_string(), json!(i))]));
        }
        let FeatureProfile::Numeric { values } = &detector.profiles["u"]["n"] else {
            panic!("expected numeric profile");
        };
        assert_eq!(values.len(), 100);
        assert_eq!(values.front().copied(), Some(50.0));
    }
}
