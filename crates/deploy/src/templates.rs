//! Files rendered into the deployment directory.

use secrecy::ExposeSecret;

use crate::types::SetupConfig;

pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

/// Gateway image with a headless Chrome, and Brave search redirected to the
/// local SearXNG adapter.
pub const DOCKERFILE: &str = r#"FROM ghcr.io/openclaw/openclaw:latest

USER root

RUN apt-get update -qq && \
    apt-get install -y -qq --no-install-recommends \
    wget gnupg2 ca-certificates \
    fonts-liberation libasound2 libatk-bridge2.0-0 libatk1.0-0 \
    libcups2 libdbus-1-3 libdrm2 libgbm1 libgtk-3-0 \
    libnspr4 libnss3 libx11-xcb1 libxcomposite1 libxdamage1 \
    libxrandr2 xdg-utils libxss1 \
    libpango-1.0-0 libpangocairo-1.0-0 libcairo2 && \
    wget -q -O - https://dl.google.com/linux/linux_signing_key.pub | gpg --dearmor -o /usr/share/keyrings/google-chrome.gpg && \
    echo "deb [arch=amd64 signed-by=/usr/share/keyrings/google-chrome.gpg] http://dl.google.com/linux/chrome/deb/ stable main" > /etc/apt/sources.list.d/google-chrome.list && \
    apt-get update -qq && \
    apt-get install -y -qq --no-install-recommends google-chrome-stable && \
    apt-get clean && rm -rf /var/lib/apt/lists/*

RUN sed -i 's|https://api.search.brave.com/res/v1/web/search|http://searxng-adapter:3000/res/v1/web/search|g' /app/dist/*.js

USER node
"#;

const COMPOSE: &str = r#"services:
  {container}:
    build: .
    image: openclaw-chrome:latest
    container_name: {container}
    restart: unless-stopped
    shm_size: 2g
    env_file:
      - .env
    volumes:
      - ./openclaw-config.yaml:/app/config.yaml
      - ./data:/app/data
      - config:/home/node/.openclaw
    depends_on:
      - searxng
    ports:
      - "18789:18789"

  searxng:
    image: docker.io/searxng/searxng:latest
    container_name: searxng
    restart: unless-stopped
    volumes:
      - ./searxng:/etc/searxng:rw
    environment:
      - SEARXNG_BASE_URL=http://searxng:8080

  searxng-adapter:
    image: openclaw-chrome:latest
    container_name: searxng-adapter
    restart: unless-stopped
    user: node
    volumes:
      - ./searxng-adapter.js:/tmp/adapter.js:ro
    entrypoint: ["node", "/tmp/adapter.js"]
    depends_on:
      - searxng
      - {container}

  valkey:
    image: docker.io/valkey/valkey:8-alpine
    container_name: searxng-redis
    restart: unless-stopped
    command: valkey-server --save 30 1 --loglevel warning

volumes:
  config:
    name: clawlink_gateway_config
"#;

const SEARXNG_SETTINGS: &str = r#"use_default_settings: true

general:
  instance_name: "OpenClaw Search"
  debug: false

search:
  safe_search: 0
  autocomplete: ""
  formats:
    - html
    - json

server:
  bind_address: "0.0.0.0"
  port: 8080
  secret_key: "{secret_key}"
  limiter: false
  image_proxy: false

redis:
  url: "redis://searxng-redis:6379/0"
"#;

/// Translates Brave search API calls into SearXNG queries.
pub const SEARXNG_ADAPTER: &str = r#"const http = require('http');
const SEARXNG = 'http://searxng:8080/search';

http.createServer(async (req, res) => {
  try {
    const url = new URL(req.url, 'http://localhost:3000');
    const q = url.searchParams.get('q') || '';
    const count = parseInt(url.searchParams.get('count') || '5', 10);
    const lang = url.searchParams.get('search_lang') || '';
    const params = new URLSearchParams({ q, format: 'json' });
    if (lang) params.set('language', lang);

    const resp = await fetch(`${SEARXNG}?${params}`);
    const data = await resp.json();
    const results = (data.results || []).slice(0, count).map(r => ({
      title: r.title || '',
      url: r.url || '',
      description: r.content || '',
      age: r.publishedDate || undefined,
    }));

    res.writeHead(200, { 'Content-Type': 'application/json' });
    res.end(JSON.stringify({ web: { results } }));
  } catch (e) {
    res.writeHead(502, { 'Content-Type': 'application/json' });
    res.end(JSON.stringify({ web: { results: [] } }));
  }
}).listen(3000, '0.0.0.0');
"#;

/// OpenRouter model id for a model slug. Unknown slugs get [`DEFAULT_MODEL`].
pub fn provider_model(slug: &str) -> &'static str {
    match slug {
        "gemini-3-flash" => "google/gemini-3-flash-preview",
        "claude-sonnet-4" => "anthropic/claude-sonnet-4",
        "gpt-4o" => "openai/gpt-4o",
        _ => DEFAULT_MODEL,
    }
}

/// Fallback chain configured for the primary model family.
pub fn fallback_models(slug: &str) -> [&'static str; 2] {
    if slug.contains("gpt") {
        ["openrouter/google/gemini-2.5-flash", "openrouter/openai/gpt-4o-mini"]
    } else {
        ["openrouter/google/gemini-2.5-flash", "openrouter/anthropic/claude-haiku-4.5"]
    }
}

pub fn compose(container: &str) -> String {
    COMPOSE.replace("{container}", container)
}

pub fn env_file(config: &SetupConfig) -> String {
    format!(
        "OPENROUTER_API_KEY={}\nTELEGRAM_BOT_TOKEN={}\nOPENCLAW_GATEWAY_TOKEN={}\nBRAVE_API_KEY=local-searxng\nLOG_LEVEL=info\n",
        config.provider_key.expose_secret(),
        config.bot_token.expose_secret(),
        config.gateway_token.expose_secret(),
    )
}

pub fn gateway_config(config: &SetupConfig) -> String {
    format!(
        r#"provider: openrouter
model: openrouter/{model}
api_key: {key}

gateway:
  mode: local
  auth:
    type: token
    token: {gateway_token}

channels:
  telegram:
    enabled: true
    botToken: {bot_token}
    dmPolicy: open
    allowFrom: ["*"]
    groupPolicy: allowlist
    streamMode: partial

limits:
  max_tokens_per_message: 4096
  max_context_messages: 30
"#,
        model = provider_model(&config.model_slug),
        key = config.provider_key.expose_secret(),
        gateway_token = config.gateway_token.expose_secret(),
        bot_token = config.bot_token.expose_secret(),
    )
}

/// SearXNG settings with a fresh 64-hex-digit secret.
pub fn searxng_settings() -> String {
    let secret = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    SEARXNG_SETTINGS.replace("{secret_key}", &secret)
}

/// `openclaw config set` calls that tune the gateway for low token use.
pub const OPTIMIZATIONS: &[(&str, &str)] = &[
    ("agents.defaults.heartbeat", r#"{"every": "0m"}"#),
    (
        "agents.defaults.subagents",
        r#"{"model": "openrouter/google/gemini-3-flash-preview", "maxConcurrent": 2, "archiveAfterMinutes": 60}"#,
    ),
    (
        "agents.defaults.imageModel",
        r#"{"primary": "openrouter/google/gemini-2.5-flash", "fallbacks": ["openrouter/openai/gpt-4o-mini"]}"#,
    ),
    (
        "agents.defaults.compaction",
        r#"{"mode": "default", "memoryFlush": {"enabled": true, "softThresholdTokens": 30000}}"#,
    ),
    (
        "agents.defaults.contextPruning",
        r#"{"mode": "cache-ttl", "ttl": "1h", "keepLastAssistants": 3}"#,
    ),
    ("agents.defaults.maxConcurrent", "2"),
    ("web.enabled", "true"),
    ("tools.web.search.provider", "brave"),
    ("tools.web.search.enabled", "true"),
    ("agents.defaults.bootstrapMaxChars", "20000"),
    ("agents.defaults.contextTokens", "100000"),
    (
        "agents.defaults.memorySearch",
        r#"{"enabled": true, "provider": "local", "store": {"path": "/home/node/.openclaw/memory.db"}}"#,
    ),
];

pub const MODEL_ALIASES: &str = r#"{"openrouter/anthropic/claude-opus-4.5":{"alias":"opus"},"openrouter/anthropic/claude-sonnet-4":{"alias":"sonnet"},"openrouter/anthropic/claude-haiku-4.5":{"alias":"haiku"},"openrouter/google/gemini-2.5-flash":{"alias":"flash"},"openrouter/deepseek/deepseek-reasoner":{"alias":"deepseek"},"openrouter/google/gemini-3-flash-preview":{"alias":"gemini3"}}"#;
