use magpie_storage::{AssistantId, DEFAULT_TOPIC_NAME, TopicId, TopicRecord};

/// Behavior settings carried by an assistant and applied to every topic it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantSettings {
    /// Upper bound on how many recent messages enter the model context.
    pub context_count: usize,
    pub temperature: f64,
    pub max_tokens: Option<u64>,
    pub stream_output: bool,
    pub hide_preset_messages: bool,
    pub auto_reset_model: bool,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            context_count: 20,
            temperature: 0.7,
            max_tokens: None,
            stream_output: true,
            hide_preset_messages: false,
            auto_reset_model: false,
        }
    }
}

/// A configured persona/model binding. Topics owned by an assistant live in
/// the conversation store and are listed through it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assistant {
    pub id: AssistantId,
    pub name: String,
    pub prompt: String,
    pub default_model: Option<String>,
    pub settings: AssistantSettings,
}

impl Assistant {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: AssistantId::new_v7(),
            name: name.into(),
            prompt: prompt.into(),
            default_model: None,
            settings: AssistantSettings::default(),
        }
    }

    pub fn with_default_model(mut self, model_id: impl Into<String>) -> Self {
        self.default_model = Some(model_id.into());
        self
    }

    pub fn with_settings(mut self, settings: AssistantSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// A named, ordered conversation thread owned by one assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: TopicId,
    pub assistant_id: AssistantId,
    pub name: String,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
}

impl Topic {
    pub fn from_record(record: TopicRecord) -> Self {
        Self {
            id: record.id,
            assistant_id: record.assistant_id,
            name: record.name,
            created_at_unix_seconds: record.created_at_unix_seconds,
            updated_at_unix_seconds: record.updated_at_unix_seconds,
        }
    }

    /// True while the topic still carries the placeholder name and is
    /// therefore eligible for auto-rename.
    pub fn has_default_name(&self) -> bool {
        self.name == DEFAULT_TOPIC_NAME
    }
}
