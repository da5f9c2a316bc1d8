use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Token prepended to every training caption and generation prompt.
pub const TRIGGER_WORD: &str = "STYLFRG";
/// Model name under the owner's namespace that fine-tunes land in.
pub const DESTINATION_MODEL_NAME: &str = "styleforge-custom";

/// Coordinates of the LoRA trainer on the image service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerSpec {
    pub owner: String,
    pub name: String,
    pub version: String,
}

impl Default for TrainerSpec {
    fn default() -> Self {
        Self {
            owner: "ostris".to_string(),
            name: "flux-dev-lora-trainer".to_string(),
            version: "d995297071a44dcb72244e6c19462111649ec86a9646c32df56daa7f14801944"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHyperparameters {
    pub steps: u32,
    pub lora_rank: u32,
    pub learning_rate: f64,
    pub autocaption: bool,
}

impl Default for TrainingHyperparameters {
    fn default() -> Self {
        Self {
            steps: 1000,
            lora_rank: 16,
            learning_rate: 0.0004,
            autocaption: false,
        }
    }
}

impl TrainingHyperparameters {
    /// Trainer `input` object for a dataset archive already uploaded to `archive_url`.
    pub fn input_payload(&self, archive_url: &str) -> Value {
        json!({
            "input_images": archive_url,
            "trigger_word": TRIGGER_WORD,
            "steps": self.steps,
            "lora_rank": self.lora_rank,
            "learning_rate": self.learning_rate,
            "autocaption": self.autocaption,
        })
    }
}

pub fn destination_for(owner: &str) -> String {
    format!("{}/{}", owner.trim().trim_end_matches('/'), DESTINATION_MODEL_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_payload_carries_trigger_and_hyperparameters() {
        let payload = TrainingHyperparameters::default().input_payload("https://files/x.zip");
        assert_eq!(payload["input_images"], "https://files/x.zip");
        assert_eq!(payload["trigger_word"], TRIGGER_WORD);
        assert_eq!(payload["steps"], 1000);
        assert_eq!(payload["lora_rank"], 16);
        assert_eq!(payload["learning_rate"], 0.0004);
        assert_eq!(payload["autocaption"], false);
    }

    #[test]
    fn destination_joins_owner_and_model_name() {
        assert_eq!(destination_for("acme"), "acme/styleforge-custom");
        assert_eq!(destination_for(" acme/ "), "acme/styleforge-custom");
    }
}
