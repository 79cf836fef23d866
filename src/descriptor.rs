//! Container descriptor for containerized-host deployments.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DESCRIPTOR_FILE: &str = "Dockerfile";

/// Port the default image serves on; opened in the host's security group.
pub const APP_PORT: u16 = 3000;

const DEFAULT_DOCKERFILE: &str = r#"FROM node:20-alpine AS deps
WORKDIR /app
COPY package*.json ./
RUN npm ci || npm install

FROM node:20-alpine AS builder
WORKDIR /app
COPY --from=deps /app/node_modules ./node_modules
COPY . .
RUN npm run build

FROM node:20-alpine AS runner
WORKDIR /app
ENV NODE_ENV=production
ENV PORT=3000
COPY --from=builder /app ./
EXPOSE 3000
CMD ["npm", "start"]
"#;

pub fn default_descriptor() -> &'static str {
    DEFAULT_DOCKERFILE
}

/// Returns the path of the app's descriptor, writing the default one first if
/// the app has none. The flag is true when a descriptor was generated.
pub async fn ensure_descriptor(app_root: &Path) -> Result<(PathBuf, bool)> {
    let path = app_root.join(DESCRIPTOR_FILE);
    if tokio::fs::try_exists(&path)
        .await
        .with_context(|| format!("Failed to check {}", path.display()))?
    {
        return Ok((path, false));
    }

    tokio::fs::write(&path, DEFAULT_DOCKERFILE)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Generated default container descriptor");
    Ok((path, true))
}
