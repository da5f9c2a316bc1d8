use anyhow::Result;
use styleforge_contracts::images::StyleExemplar;
use styleforge_contracts::models::TRIGGER_WORD;
use tracing::warn;

use super::retrieval::retrieve_exemplars;
use crate::clients::{ChatMessage, ChatRequest, LanguageModel, VectorIndex};
use crate::http::error_chain_text;

const ENHANCE_INSTRUCTION: &str = "You are an art director helping a creative team. Take the user's prompt and enhance it with specific artistic details: composition, lighting, color palette, texture, and mood. Keep it under 100 words. Return ONLY the enhanced prompt, nothing else.";
const ENHANCE_MAX_TOKENS: u32 = 200;

pub const STYLE_INSTRUCTION: &str = "Match this illustrative style closely - use similar color palettes, brushwork, textures, and compositional approach.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub generation_prompt: String,
    pub enhanced_prompt: String,
    pub exemplars: Vec<StyleExemplar>,
}

/// Best-effort enhancement: any failure or empty answer yields `raw` verbatim.
pub fn enhance_prompt(model: &dyn LanguageModel, raw: &str) -> String {
    let request = ChatRequest {
        messages: vec![ChatMessage::system(ENHANCE_INSTRUCTION), ChatMessage::user(raw)],
        max_tokens: ENHANCE_MAX_TOKENS,
    };
    match model.complete(&request) {
        Ok(Some(enhanced)) => enhanced,
        Ok(None) => {
            warn!(model = model.name(), "prompt enhancement returned no content");
            raw.to_string()
        }
        Err(err) => {
            warn!(
                model = model.name(),
                error = %error_chain_text(&err, 300),
                "prompt enhancement failed; using raw prompt"
            );
            raw.to_string()
        }
    }
}

pub fn generation_prompt(enhanced: &str, exemplars: &[StyleExemplar]) -> String {
    let references = exemplars
        .iter()
        .map(|exemplar| exemplar.caption.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{TRIGGER_WORD} {enhanced}. Artistic style reference: {references}. {STYLE_INSTRUCTION}"
    )
}

pub fn compose(
    model: &dyn LanguageModel,
    index: &dyn VectorIndex,
    raw: &str,
    project_id: Option<&str>,
) -> Result<ComposedPrompt> {
    let enhanced_prompt = enhance_prompt(model, raw);
    let exemplars = retrieve_exemplars(index, raw, project_id)?;
    Ok(ComposedPrompt {
        generation_prompt: generation_prompt(&enhanced_prompt, &exemplars),
        enhanced_prompt,
        exemplars,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clients::MessageContent;
    use crate::fakes::{FakeIndex, FakeModel};

    #[test]
    fn enhancement_sends_art_director_instruction() {
        let model = FakeModel::replying(Some("A dog sprinting through golden wheat"));
        let enhanced = enhance_prompt(&model, "a dog running");
        assert_eq!(enhanced, "A dog sprinting through golden wheat");

        let requests = model.requests();
        assert_eq!(requests[0].max_tokens, 200);
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(
            requests[0].messages[1].content,
            MessageContent::Text("a dog running".to_string())
        );
    }

    #[test]
    fn enhancement_failure_falls_back_to_raw_prompt() {
        assert_eq!(enhance_prompt(&FakeModel::failing(), "a dog"), "a dog");
        assert_eq!(enhance_prompt(&FakeModel::replying(None), "a dog"), "a dog");
    }

    #[test]
    fn prompt_without_exemplars_keeps_trigger_and_instruction() {
        let prompt = generation_prompt("a dog at dusk", &[]);
        assert!(prompt.starts_with("STYLFRG a dog at dusk."));
        assert!(prompt.contains("Artistic style reference: ."));
        assert!(prompt.ends_with(STYLE_INSTRUCTION));
    }

    #[test]
    fn compose_joins_exemplar_captions() -> anyhow::Result<()> {
        let model = FakeModel::replying(Some("a dog at dusk"));
        let index = FakeIndex::with_rows(vec![
            vec![json!(1), json!("a.png"), json!("A cat in watercolor"), json!("p1")],
            vec![json!(2), json!("b.png"), json!("A cat in ink"), json!("p1")],
        ]);
        let composed = compose(&model, &index, "a dog running", Some("p1"))?;
        assert_eq!(composed.enhanced_prompt, "a dog at dusk");
        assert_eq!(composed.exemplars.len(), 2);
        assert_eq!(
            composed.generation_prompt,
            format!(
                "STYLFRG a dog at dusk. Artistic style reference: A cat in watercolor A cat in ink. {STYLE_INSTRUCTION}"
            )
        );
        assert_eq!(index.queries()[0].query_text, "a dog running");
        Ok(())
    }

    #[test]
    fn retrieval_failure_is_not_absorbed() {
        let model = FakeModel::replying(Some("x"));
        assert!(compose(&model, &FakeIndex::failing(), "a dog", None).is_err());
    }
}
