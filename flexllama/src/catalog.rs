//! The immutable model catalog: alias -> runner assignment and launch recipe.

use std::collections::HashMap;

use flexllama_common::ModelKind;
use serde::{Deserialize, Serialize};

/// Recognized llama.cpp server flags the catalog may set per model, composed
/// into argv alongside the runner's own `extra_args`. See launch composition
/// in the external-interfaces section of the design notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchOpts {
    #[serde(default)]
    pub n_ctx: Option<u32>,
    #[serde(default)]
    pub n_batch: Option<u32>,
    #[serde(default)]
    pub n_threads: Option<u32>,
    #[serde(default)]
    pub n_gpu_layers: Option<u32>,
    #[serde(default)]
    pub main_gpu: Option<u32>,
    #[serde(default)]
    pub tensor_split: Option<String>,
    #[serde(default)]
    pub use_mlock: Option<bool>,
    #[serde(default)]
    pub flash_attn: Option<String>,
    #[serde(default)]
    pub offload_kqv: Option<bool>,
    #[serde(default)]
    pub split_mode: Option<String>,
    #[serde(default, rename = "cache-type-k")]
    pub cache_type_k: Option<String>,
    #[serde(default, rename = "cache-type-v")]
    pub cache_type_v: Option<String>,
    #[serde(default)]
    pub chat_template: Option<String>,
    #[serde(default)]
    pub jinja: Option<bool>,
    #[serde(default, rename = "rope-scaling")]
    pub rope_scaling: Option<String>,
    #[serde(default, rename = "rope-scale")]
    pub rope_scale: Option<f32>,
    #[serde(default, rename = "yarn-orig-ctx")]
    pub yarn_orig_ctx: Option<u32>,
    #[serde(default)]
    pub pooling: Option<String>,
    #[serde(default)]
    pub embedding: Option<bool>,
    #[serde(default)]
    pub reranking: Option<bool>,
    /// Free-form flags, tokenized by whitespace and appended after the
    /// recognized keys above but before the runner's own `extra_args`.
    #[serde(default)]
    pub args: Option<String>,
}

impl LaunchOpts {
    /// Expand into argv fragments, recognized keys first, then the
    /// whitespace-tokenized free-form `args` string.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();

        macro_rules! push_flag {
            ($name:expr, $value:expr) => {
                if let Some(v) = $value {
                    argv.push(format!("--{}", $name));
                    argv.push(v.to_string());
                }
            };
        }

        push_flag!("n_ctx", &self.n_ctx);
        push_flag!("n_batch", &self.n_batch);
        push_flag!("n_threads", &self.n_threads);
        push_flag!("n_gpu_layers", &self.n_gpu_layers);
        push_flag!("main_gpu", &self.main_gpu);
        push_flag!("tensor_split", &self.tensor_split);
        if let Some(true) = self.use_mlock {
            argv.push("--use_mlock".to_string());
        }
        push_flag!("flash_attn", &self.flash_attn);
        if let Some(true) = self.offload_kqv {
            argv.push("--offload_kqv".to_string());
        }
        push_flag!("split_mode", &self.split_mode);
        push_flag!("cache-type-k", &self.cache_type_k);
        push_flag!("cache-type-v", &self.cache_type_v);
        push_flag!("chat_template", &self.chat_template);
        if let Some(true) = self.jinja {
            argv.push("--jinja".to_string());
        }
        push_flag!("rope-scaling", &self.rope_scaling);
        push_flag!("rope-scale", &self.rope_scale);
        push_flag!("yarn-orig-ctx", &self.yarn_orig_ctx);
        push_flag!("pooling", &self.pooling);
        if let Some(true) = self.embedding {
            argv.push("--embedding".to_string());
        }
        if let Some(true) = self.reranking {
            argv.push("--reranking".to_string());
        }

        if let Some(free_form) = &self.args {
            argv.extend(free_form.split_whitespace().map(str::to_string));
        }

        argv
    }
}

/// One catalog entry: an alias, the runner that must host it, and how to
/// launch it on that runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub alias: String,
    pub runner_id: String,
    pub model_path: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub mmproj_path: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, flatten)]
    pub launch_opts: LaunchOpts,
}

/// The immutable alias -> ModelSpec table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    order: Vec<ModelSpec>,
    by_alias: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        let mut by_alias = HashMap::with_capacity(models.len());
        for (idx, spec) in models.iter().enumerate() {
            by_alias.insert(spec.alias.clone(), idx);
        }
        Self {
            order: models,
            by_alias,
        }
    }

    pub fn resolve(&self, alias: &str) -> Option<&ModelSpec> {
        self.by_alias.get(alias).map(|&idx| &self.order[idx])
    }

    pub fn all(&self) -> impl Iterator<Item = &ModelSpec> {
        self.order.iter()
    }

    pub fn for_runner<'a>(&'a self, runner_id: &'a str) -> impl Iterator<Item = &'a ModelSpec> {
        self.order.iter().filter(move |m| m.runner_id == runner_id)
    }

    /// The model preloaded by `auto_start_runners`: the first catalog entry
    /// (in config declaration order) assigned to this runner.
    pub fn default_for_runner(&self, runner_id: &str) -> Option<&ModelSpec> {
        self.for_runner(runner_id).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(alias: &str, runner_id: &str) -> ModelSpec {
        ModelSpec {
            alias: alias.to_string(),
            runner_id: runner_id.to_string(),
            model_path: format!("/models/{alias}.gguf"),
            kind: ModelKind::Chat,
            mmproj_path: None,
            env: HashMap::new(),
            launch_opts: LaunchOpts::default(),
        }
    }

    #[test]
    fn resolve_finds_known_alias() {
        let catalog = Catalog::new(vec![spec("m1", "r1"), spec("m2", "r1")]);
        assert_eq!(catalog.resolve("m1").unwrap().runner_id, "r1");
        assert!(catalog.resolve("missing").is_none());
    }

    #[test]
    fn default_for_runner_is_first_declared() {
        let catalog = Catalog::new(vec![spec("m1", "r1"), spec("m2", "r1"), spec("m3", "r2")]);
        assert_eq!(catalog.default_for_runner("r1").unwrap().alias, "m1");
        assert_eq!(catalog.default_for_runner("r2").unwrap().alias, "m3");
        assert!(catalog.default_for_runner("r3").is_none());
    }

    #[test]
    fn for_runner_filters_by_assignment() {
        let catalog = Catalog::new(vec![spec("m1", "r1"), spec("m2", "r2"), spec("m3", "r1")]);
        let aliases: Vec<_> = catalog.for_runner("r1").map(|m| m.alias.as_str()).collect();
        assert_eq!(aliases, vec!["m1", "m3"]);
    }

    #[test]
    fn launch_opts_compose_recognized_flags_then_free_form_args() {
        let opts = LaunchOpts {
            n_ctx: Some(4096),
            n_gpu_layers: Some(99),
            flash_attn: Some("on".to_string()),
            jinja: Some(true),
            args: Some("--verbose --seed 42".to_string()),
            ..Default::default()
        };
        let argv = opts.to_argv();
        assert_eq!(
            argv,
            vec![
                "--n_ctx",
                "4096",
                "--n_gpu_layers",
                "99",
                "--flash_attn",
                "on",
                "--jinja",
                "--verbose",
                "--seed",
                "42",
            ]
        );
    }

    #[test]
    fn launch_opts_omit_unset_flags() {
        let opts = LaunchOpts::default();
        assert!(opts.to_argv().is_empty());
    }
}
