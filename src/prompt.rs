//! System-prompt builder.
//!
//! Builds the instructional payload from composable sections. Pure and
//! deterministic: identical inputs yield byte-identical output. The text
//! is sent exactly once per conversation handle, seeded as the
//! conversation's initial system entry.

use crate::persona::{AgentPersona, Personality};
use crate::plan::OnboardingPlan;

const IDENTITY: &str = "You are an onboarding assistant. Your job is to collect the datapoints \
listed below through natural conversation, one or two questions at a time. \
Never present the list as a form; weave questions into the dialogue. \
When the user shares a work email, call the enrich_email tool and use the \
result to pre-fill answers, always confirming them with the user. \
Use google_auth when the user wants to link an account and stripe_payment \
when billing comes up. Acknowledge what you already know instead of asking twice.";

const FALLBACK_TRAIT: &str = "- Friendly, professional, and concise";

fn build_personality_section(persona: &AgentPersona) -> String {
    let rendered = match &persona.personality {
        Personality::Text(text) => text.clone(),
        Personality::Traits(traits) if traits.is_empty() => FALLBACK_TRAIT.to_string(),
        Personality::Traits(traits) => traits
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    format!("## Personality\n{}", rendered)
}

fn build_context_section(persona: &AgentPersona) -> String {
    let rendered = if persona.context.is_empty() {
        "-".to_string()
    } else {
        persona
            .context
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("## Context\n{}", rendered)
}

fn build_plan_section(plan: &OnboardingPlan) -> String {
    let mut out = String::from("## Onboarding data to collect");
    for section in &plan.sections {
        out.push_str(&format!("\n- Section: {}", section.section));
        for dp in &section.datapoints {
            out.push_str(&format!("\n  - {}", dp.name));
            out.push_str(&format!("\n    - Format: {}", dp.format));
            out.push_str(&format!("\n    - Instructions: {}", dp.instructions));
            if !dp.options.is_empty() {
                out.push_str(&format!("\n    - Options: {}", dp.options.join(", ")));
            }
        }
    }
    out
}

/// Render the full system prompt for one conversation.
pub fn build_system_prompt(persona: &AgentPersona, plan: &OnboardingPlan) -> String {
    [
        IDENTITY.to_string(),
        build_personality_section(persona),
        build_context_section(persona),
        build_plan_section(plan),
    ]
    .join("\n\n")
}
