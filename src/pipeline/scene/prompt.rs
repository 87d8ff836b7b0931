/// Builds the analysis prompt sent alongside the captured frame.
pub fn scene_prompt(labels: &[String]) -> String {
    let listed = if labels.is_empty() {
        "none".to_string()
    } else {
        labels.join(", ")
    };
    format!(
        "These objects were detected in a CCTV frame: {listed}.\n\
         Using this list and the attached image, answer the following:\n\
         1. What situation does this scene appear to show? (for example ordinary road traffic, congestion, pedestrians moving)\n\
         2. Is there anything notable or any potential hazard?\n\
         3. Describe how the detected objects relate to each other.\n\
         4. Summarize the scene in one sentence."
    )
}
