//! Prompts for model-backed candidate extraction

use crate::extractor::truncate_chars;

/// Characters of source text sent to the model
pub const MAX_PROMPT_TEXT_CHARS: usize = 12_000;

pub const CANDIDATE_SYSTEM_PROMPT: &str = r#"You are a cyber threat intelligence analyst writing business risk statements for executives.

Extract cyber risk candidates from the supplied report text.

## Rules

1. Each risk must be supported by the text. Do not invent threats, actors or sectors.
2. `name` is a short, reusable risk name (e.g. "Ransomware Campaign Expansion"); reuse the same name for the same threat pattern.
3. `taxonomy_category` is a broad category such as Ransomware, Phishing, Supply Chain, Cyber Threat.
4. `threat_actor` is the named group if the text names one, otherwise null.
5. `affected_sectors` and `affected_assets` are short title-cased labels.
6. `claims` are factual sentences copied or closely paraphrased from the text. They are matched back to the source, so keep the original wording.
7. `business_impact` and `why_care` speak to business consequences, not technical detail.
8. `time_horizon` is a label such as "0-90 days".
9. `recommended_actions` are concrete, ordered steps.
10. `confidence` is a number between 0 and 1.

Return an empty `risks` array if the text contains no cyber risk."#;

pub fn build_candidate_prompt(text: &str) -> String {
    format!(
        "Extract cyber risk candidates from the following report.\n\n## Report Text\n\n{}",
        truncate_chars(text, MAX_PROMPT_TEXT_CHARS)
    )
}
