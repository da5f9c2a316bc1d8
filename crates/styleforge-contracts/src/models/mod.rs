mod selectors;
mod trainer;

pub use selectors::{ModelSelection, ModelSelector, ModelSource, BASELINE_MODEL_VERSION};
pub use trainer::{
    destination_for, TrainerSpec, TrainingHyperparameters, DESTINATION_MODEL_NAME, TRIGGER_WORD,
};
