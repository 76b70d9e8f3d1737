//! Default values for configuration

// ----- clone -----

/// Default maximum repository size accepted by the clone stage (MB)
pub fn default_clone_max_repo_size_mb() -> u64 {
    200
}

// ----- chunk -----

/// Default maximum lines per chunk
pub fn default_chunk_max_lines() -> usize {
    120
}

/// Default maximum bytes per chunk
pub fn default_chunk_max_bytes() -> usize {
    6000
}

/// Default overlap lines between consecutive chunks
pub fn default_chunk_overlap_lines() -> usize {
    10
}

/// Files with less meaningful content than this are skipped
pub fn default_chunk_min_file_chars() -> usize {
    50
}

/// Default maximum size of a single file (2 MB)
pub fn default_chunk_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}

/// Default maximum files considered per repository
pub fn default_chunk_max_files() -> usize {
    10_000
}

/// Default maximum chunks per repository
pub fn default_chunk_max_chunks() -> usize {
    50_000
}

// ----- embedding -----

/// Default embedding backend kind
pub fn default_embedding_backend() -> String {
    std::env::var("REPOINTEL_EMBEDDING_BACKEND").unwrap_or_else(|_| "hashing".to_string())
}

/// Default embedding backend URL (OpenAI-compatible)
pub fn default_embedding_url() -> String {
    std::env::var("REPOINTEL_EMBEDDING_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "repointel-hashing-v1".to_string()
}

/// Default embedding dimension
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding requests per second
pub fn default_embedding_requests_per_second() -> u32 {
    10
}

/// Default per-batch retry count
pub fn default_embedding_max_retries() -> u32 {
    3
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    30
}

/// Default environment variable holding the embedding API key
pub fn default_embedding_api_key_env() -> String {
    "REPOINTEL_EMBEDDING_API_KEY".to_string()
}

// ----- llm -----

/// Default LLM backend URL (OpenAI-compatible)
pub fn default_llm_url() -> String {
    std::env::var("REPOINTEL_LLM_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string())
}

/// Default LLM model
pub fn default_llm_model() -> String {
    "llama3.1".to_string()
}

/// Default environment variable holding the LLM API key
pub fn default_llm_api_key_env() -> String {
    "REPOINTEL_LLM_API_KEY".to_string()
}

/// Default LLM request timeout in seconds
pub fn default_llm_timeout() -> u64 {
    120
}

/// Default LLM requests per second
pub fn default_llm_requests_per_second() -> u32 {
    2
}

/// Default sampling temperature
pub fn default_llm_temperature() -> f32 {
    0.2
}

/// Default completion token limit
pub fn default_llm_max_tokens() -> u32 {
    2048
}

/// Default retries per LLM call on rate limits and network errors
pub fn default_llm_max_retries() -> u32 {
    2
}

// ----- jobs -----

/// Default number of workers
pub fn default_jobs_workers() -> usize {
    2
}

/// Default queue poll interval (ms)
pub fn default_jobs_poll_interval_ms() -> u64 {
    500
}

/// Default attempts per job
pub fn default_jobs_max_attempts() -> u32 {
    3
}

/// Default first retry delay (ms)
pub fn default_jobs_backoff_base_ms() -> u64 {
    1000
}

/// Default retry delay cap (ms)
pub fn default_jobs_backoff_max_ms() -> u64 {
    60_000
}

/// Default: successful stages submit the next stage
pub fn default_jobs_auto_advance() -> bool {
    true
}

pub fn default_jobs_clone_timeout() -> u64 {
    600
}

pub fn default_jobs_structure_timeout() -> u64 {
    600
}

pub fn default_jobs_index_timeout() -> u64 {
    1800
}

pub fn default_jobs_docs_timeout() -> u64 {
    900
}

// ----- search -----

/// Default number of search results
pub fn default_search_limit() -> usize {
    10
}

/// Default maximum search results
pub fn default_search_max_results() -> usize {
    100
}

/// Default minimum similarity score
pub fn default_search_min_score() -> f32 {
    0.65
}

/// Default snippet length in lines
pub fn default_search_snippet_lines() -> usize {
    8
}

// ----- tutor -----

/// Default chunks retrieved per question
pub fn default_tutor_top_k() -> usize {
    5
}

/// Default minimum score for tutor evidence
pub fn default_tutor_min_score() -> f32 {
    0.65
}

/// Default idle session lifetime (hours)
pub fn default_tutor_session_ttl_hours() -> i64 {
    24
}

/// Default maximum prior turns replayed as context
pub fn default_tutor_max_history_turns() -> usize {
    5
}

/// Default token budget for replayed history
pub fn default_tutor_history_token_budget() -> usize {
    500
}

/// Default token budget for the rolling conversation summary
pub fn default_tutor_summary_token_budget() -> usize {
    500
}

// ----- docs -----

/// Default maximum chunks given to the documentation model
pub fn default_docs_max_context_chunks() -> usize {
    24
}

/// Default maximum characters of chunk context
pub fn default_docs_max_context_chars() -> usize {
    24_000
}
