pub const EDIT_SINGLE: &str = include_str!("../data/prompts/edit_single.txt");
pub const EDIT_MULTI: &str = include_str!("../data/prompts/edit_multi.txt");

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}

/// Wrap a user instruction for edit mode, worded for one or several inputs.
pub fn edit_prompt(instruction: &str, image_count: usize) -> String {
    let instruction = instruction.trim();
    let prompt = if image_count <= 1 {
        render(EDIT_SINGLE, &[("instruction", instruction)])
    } else {
        render(
            EDIT_MULTI,
            &[("instruction", instruction), ("count", &image_count.to_string())],
        )
    };
    prompt.trim_end().to_string()
}
