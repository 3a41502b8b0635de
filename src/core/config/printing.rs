use crate::core::config::data::Config;

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

impl Config {
    /// Resolved configuration, one `key: value` per line.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![
            format!("provider: {}", self.provider()),
            format!("base-url: {}", self.base_url()),
            format!("models: {}", self.models().join(", ")),
            format!("model-index: {}", self.model_index()),
            format!("rotate-models: {}", on_off(self.rotate_models())),
            format!("cycle-size: {}", self.cycle_size()),
            format!("temperature: {}", self.temperature()),
            format!("safety: {}", on_off(self.safety_enabled())),
            format!("use-history: {}", on_off(self.use_history())),
            format!("proxy: {}", self.proxy().unwrap_or("(unset)")),
            format!("request-timeout: {}s", self.request_timeout().as_secs()),
            format!("voice: {}", on_off(self.voice_enabled())),
        ];
        if self.initial_prompt.is_empty() {
            lines.push("initial-prompt: (none set)".to_string());
        } else {
            lines.push(format!("initial-prompt: {} message(s)", self.initial_prompt.len()));
        }
        lines
    }

    pub fn print_all(&self) {
        println!("Current configuration:");
        for line in self.describe() {
            println!("  {line}");
        }
    }
}
