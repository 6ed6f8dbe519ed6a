//! Provider, model and credential selection.
//!
//! [`Settings`] is plain data. Every mutator reports whether anything
//! changed; persisting the new state is left to whoever owns the value.

use crate::client::BackendConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
}

pub const PROVIDERS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "DeepSeek",
        base_url: "https://api.deepseek.com",
        model: "deepseek-chat",
    },
    ProviderPreset {
        name: "InternLM",
        base_url: "https://chat.intern-ai.org.cn/api/v1",
        model: "internlm3-latest",
    },
    ProviderPreset {
        name: "DashScope",
        base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        model: "qwen-plus-latest",
    },
    ProviderPreset {
        name: "Kimi",
        base_url: "https://api.moonshot.cn/v1",
        model: "kimi-k2-0711-preview",
    },
    ProviderPreset {
        name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        model: "gpt-4.1",
    },
    ProviderPreset {
        name: "ShengSuanYun",
        base_url: "https://router.shengsuanyun.com/api/v1",
        model: "moonshot/kimi-latest",
    },
    ProviderPreset {
        name: "SiliconFlow",
        base_url: "https://api.siliconflow.cn/v1",
        model: "siliconflow-model-latest",
    },
    ProviderPreset {
        name: "OpenRouter",
        base_url: "https://openrouter.ai/api/v1",
        model: "openai/gpt-4o-mini",
    },
];

pub fn find_provider(name: &str) -> Option<&'static ProviderPreset> {
    PROVIDERS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for Settings {
    fn default() -> Self {
        let preset = &PROVIDERS[0];
        Self {
            provider: preset.name.to_string(),
            base_url: preset.base_url.to_string(),
            api_key: String::new(),
            model: preset.model.to_string(),
        }
    }
}

impl Settings {
    /// Switches to a built-in provider, resetting base URL and model to its
    /// defaults. Unknown names leave the settings untouched.
    pub fn select_provider(&mut self, name: &str) -> bool {
        let Some(preset) = find_provider(name) else {
            return false;
        };

        let next = Self {
            provider: preset.name.to_string(),
            base_url: preset.base_url.to_string(),
            api_key: std::mem::take(&mut self.api_key),
            model: preset.model.to_string(),
        };
        let changed = next != *self;
        *self = next;
        changed
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) -> bool {
        replace(&mut self.base_url, base_url.into())
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) -> bool {
        replace(&mut self.api_key, api_key.into())
    }

    pub fn set_model(&mut self, model: impl Into<String>) -> bool {
        replace(&mut self.model, model.into())
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig::new(&self.base_url, &self.api_key, &self.model).with_provider(&self.provider)
    }
}

fn replace(slot: &mut String, value: String) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
