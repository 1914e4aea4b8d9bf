//! Onboarding plan: the ordered sections and datapoints the agent works
//! through. Purely descriptive — consumed only to render prompt text.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingPlan {
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section: String,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datapoint {
    pub name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub instructions: String,
    /// Allowed values, when the datapoint is a closed choice.
    #[serde(default)]
    pub options: Vec<String>,
}

impl Default for OnboardingPlan {
    fn default() -> Self {
        Self {
            sections: vec![
                Section {
                    section: "Company basics".to_string(),
                    datapoints: vec![
                        Datapoint {
                            name: "Company name".to_string(),
                            format: "short text".to_string(),
                            instructions: "Ask early; confirm unusual spellings.".to_string(),
                            options: Vec::new(),
                        },
                        Datapoint {
                            name: "Website".to_string(),
                            format: "URL".to_string(),
                            instructions: "Infer from a work email domain when possible."
                                .to_string(),
                            options: Vec::new(),
                        },
                    ],
                },
                Section {
                    section: "Primary contact".to_string(),
                    datapoints: vec![
                        Datapoint {
                            name: "Full name".to_string(),
                            format: "short text".to_string(),
                            instructions: "Use enrichment data to pre-fill and confirm."
                                .to_string(),
                            options: Vec::new(),
                        },
                        Datapoint {
                            name: "Role".to_string(),
                            format: "one of the listed options".to_string(),
                            instructions: "Pick the closest match.".to_string(),
                            options: vec![
                                "Founder".to_string(),
                                "Engineering".to_string(),
                                "Operations".to_string(),
                                "Other".to_string(),
                            ],
                        },
                    ],
                },
            ],
        }
    }
}

/// Fetch the onboarding document from the configuration service.
pub async fn fetch(http: &reqwest::Client, base_url: &str) -> Result<OnboardingPlan> {
    let url = format!("{}/onboarding", base_url.trim_end_matches('/'));
    let plan = http
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("GET {}", url))?
        .json::<OnboardingPlan>()
        .await
        .context("onboarding document is not valid JSON")?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_document_shape() {
        let json = r#"{
            "sections": [
                {
                    "section": "Billing",
                    "datapoints": [
                        {"name": "Plan", "format": "choice", "instructions": "Offer all tiers.", "options": ["Free", "Pro"]}
                    ]
                }
            ]
        }"#;
        let plan: OnboardingPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.sections.len(), 1);
        assert_eq!(plan.sections[0].datapoints[0].options, vec!["Free", "Pro"]);
    }

    #[test]
    fn options_default_to_empty() {
        let json = r#"{"sections": [{"section": "S", "datapoints": [{"name": "N"}]}]}"#;
        let plan: OnboardingPlan = serde_json::from_str(json).unwrap();
        assert!(plan.sections[0].datapoints[0].options.is_empty());
        assert!(plan.sections[0].datapoints[0].format.is_empty());
    }
}
