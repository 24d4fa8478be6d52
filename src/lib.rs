//! # Anveshak - configuration driven loading of LLM and embedding model clients
//!
//! Rust-native library that instantiates chat LLM and embedding model API
//! clients from a YAML configuration file and environment based API keys.
//!
//! Supported chat providers are OpenAI, Google Gemini and Groq; embeddings
//! are served by the Google Generative AI embedContent API. The provider to
//! load is selected by the `LLM_PROVIDER` environment variable against the
//! provider blocks of the configuration file.
//!
//! Errors raised anywhere on the loading path are wrapped into
//! [`error::AnveshakError`], which records the source file, line number and
//! backtrace text of the deepest failure for diagnostic logging. The
//! sanskrit word anveṣaka (अन्वेषक) means an investigator or researcher.
//!
//! # Quick Start:
//! Here is an example to quickly get started:
//!
//! //     use anveshak::loader::ModelLoader;
//! //     use anveshak::logger;
//! //
//! //     let _guard = logger::init_default_logging()?;
//! //
//! //     let model_loader = ModelLoader::new()?;
//! //
//! //     let llm = model_loader.load_llm()?;
//! //     let answer = llm.generate("You are a concise analyst.", "How is a rainbow created in the sky?")?;
//! //     println!("{}", answer.generated_text);
//! //
//! //     let embeddings = model_loader.load_embeddings()?;
//! //     let vector = embeddings.embed_query("Hello, how are you?")?;
//! //
//!
//! By default, the api keys for the services are picked up from the
//! environment variables named on their respective API reference pages:
//!   - OpenAI: `OPENAI_API_KEY`
//!   - Google: `GOOGLE_API_KEY`
//!   - Groq: `GROQ_API_KEY`
//!
//! # Configuration File
//! The loader reads the file named by `MODEL_CONFIG_PATH` (default
//! `config/model_config.yaml`), with entries like these:
//!
//! <tt>
//!
//! embedding_model:
//!
//!  model_name: models/text-embedding-004
//!
//! llm:
//!
//!  OPENAI:
//!
//!   provider: openai
//!
//!   model_name: gpt-4o-mini
//!
//!   temperature: 0.2
//!
//!   max_tokens: 2048
//!
//! </tt>

pub mod error;
pub mod loader;
pub mod logger;
pub mod providers {
    pub mod google;
    pub mod groq;
    pub mod openai;
}
