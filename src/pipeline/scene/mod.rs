mod describer;
mod gemini;
mod prompt;

pub use describer::{
    DescriberService, DescriberStack, DescriberStackBuilder, SceneDescriber, SceneRequest,
};
pub use gemini::GeminiDescriber;
pub use prompt::scene_prompt;
