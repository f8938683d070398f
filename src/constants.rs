//! Centralized constants for nagare.
//!
//! All magic numbers, default strings, and configuration constants live here
//! so they can be changed in one place.

/// Application name used in CLI output and directory paths.
pub const APP_NAME: &str = "nagare";

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV_VAR: &str = "NAGARE_LOG";

/// Log level used when neither `NAGARE_LOG` nor the config sets one.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Default LLM model identifier.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-6";

/// Maximum tokens for LLM completions.
pub const MAX_TOKENS: u64 = 4096;

/// Default system prompt prepended to all conversations.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are nagare, a helpful assistant in the terminal. \
Use the available tools when they help answer the question. Be concise.";

/// Configuration filename.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Per-project configuration filename.
pub const PROJECT_CONFIG_FILENAME: &str = "nagare.toml";

/// Readline history filename.
pub const HISTORY_FILENAME: &str = "chat_history.txt";

// --- Provider defaults ---

/// Default provider when none is configured.
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Default LLM model identifier for OpenAI.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";

/// Default LLM model identifier for OpenRouter.
pub const DEFAULT_OPENROUTER_MODEL: &str = "arcee-ai/trinity-large-preview:free";

/// Default base URL for local Ollama server.
pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default LLM model identifier for Ollama.
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3";

// --- Conversation loop ---

/// Ceiling on request/tool round-trips for one user message.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Capacity of the streaming update channel.
pub const DEFAULT_UPDATE_BUFFER: usize = 100;

/// Emit an activity refresh every this many chunks.
pub const DEFAULT_ACTIVITY_REFRESH_CHUNKS: usize = 10;

/// How long a terminal update may wait on a full channel, in milliseconds.
pub const DEFAULT_TERMINAL_SEND_TIMEOUT_MS: u64 = 5_000;

/// Format tag passed to the registry when asking for tool definitions.
pub const DEFAULT_TOOL_DEFINITION_FORMAT: &str = "openai";

/// Streamed progress is capped here until the final chunk arrives.
pub const STREAMING_PROGRESS_CAP: f64 = 90.0;

/// Longest tool summary shown inside a progress marker.
pub const PROGRESS_SUMMARY_MAX_CHARS: usize = 50;

// --- Activity tree ---

/// Maximum number of nodes an activity tree will hold.
pub const ACTIVITY_MAX_NODES: usize = 100;

/// Maximum nesting depth of the activity tree.
pub const ACTIVITY_MAX_DEPTH: usize = 10;

// --- Tool limits ---

/// Maximum file size (bytes) the file_read tool will read.
pub const READ_FILE_MAX_SIZE: u64 = 100 * 1024;

/// Byte threshold for binary file detection (check first N bytes for null).
pub const BINARY_DETECTION_BYTES: usize = 8192;

/// Maximum number of matching lines the grep tool returns.
pub const GREP_MAX_MATCHES: usize = 50;

/// Default timeout for bash commands, in seconds.
pub const BASH_DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum bash output kept before truncation, in bytes.
pub const BASH_MAX_OUTPUT_SIZE: usize = 50 * 1024;

/// Environment variables removed before spawning shell commands.
pub const BASH_STRIPPED_ENV_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "OPENROUTER_API_KEY",
];
