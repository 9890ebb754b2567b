use std::fmt::Write as _;
use std::path::Path;

use relauth_core::engine::LookupPage;
use relauth_core::schema::parse_schema_with_limits;
use relauth_core::tuple::SnapshotToken;

use crate::cli::{Command, Sources};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::loader::parse_tuple_file;
use crate::service::AuthzService;

/// Runs one subcommand and returns what it prints.
pub async fn run(command: Command, config: &AppConfig) -> Result<String, AppError> {
    match command {
        Command::Validate { schema } => validate(&schema, config),
        Command::Check {
            sources,
            object,
            permission,
            subject,
        } => {
            let service = load(&sources, config).await?;
            let result = service
                .check(object, permission, subject, snapshot(&sources))
                .await?;
            let decision = if result.allowed() { "allowed" } else { "denied" };
            Ok(format!("{decision} (snapshot {})\n", result.snapshot))
        }
        Command::Expand {
            sources,
            object,
            permission,
        } => {
            let service = load(&sources, config).await?;
            let tree = service
                .expand(object, permission, snapshot(&sources))
                .await?;
            Ok(tree.to_string())
        }
        Command::LookupResources {
            sources,
            paging,
            resource_type,
            permission,
            subject,
        } => {
            let service = load(&sources, config).await?;
            let page = service
                .lookup_resources(
                    resource_type,
                    permission,
                    subject,
                    snapshot(&sources),
                    paging.cursor,
                    paging.page_size,
                )
                .await?;
            Ok(render_page(&page))
        }
        Command::LookupSubjects {
            sources,
            paging,
            object,
            permission,
            subject_type,
        } => {
            let service = load(&sources, config).await?;
            let page = service
                .lookup_subjects(
                    object,
                    permission,
                    &subject_type,
                    snapshot(&sources),
                    paging.cursor,
                    paging.page_size,
                )
                .await?;
            Ok(render_page(&page))
        }
    }
}

fn read(path: &Path) -> Result<String, AppError> {
    std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))
}

fn validate(path: &Path, config: &AppConfig) -> Result<String, AppError> {
    let schema = parse_schema_with_limits(&read(path)?, &config.to_schema_limits())?;

    let mut out = String::new();
    for entity in schema.entities() {
        let _ = writeln!(
            out,
            "entity {}: {} relations, {} permissions",
            entity.name,
            entity.relations.len(),
            entity.permissions.len()
        );
    }
    let _ = writeln!(out, "schema is valid");
    Ok(out)
}

async fn load(sources: &Sources, config: &AppConfig) -> Result<AuthzService, AppError> {
    let service = AuthzService::new(
        &read(&sources.schema)?,
        &config.to_schema_limits(),
        config.to_engine_config(),
        config.lookup.page_size,
    )?;
    if let Some(path) = &sources.tuples {
        let writes = parse_tuple_file(&read(path)?)?;
        service.write_tuples(&writes).await?;
    }
    Ok(service)
}

fn snapshot(sources: &Sources) -> Option<SnapshotToken> {
    sources.snapshot.map(SnapshotToken::new)
}

fn render_page(page: &LookupPage) -> String {
    let mut out = String::new();
    for id in &page.ids {
        let _ = writeln!(out, "{id}");
    }
    if let Some(cursor) = &page.next_cursor {
        let _ = writeln!(out, "next cursor: {cursor}");
    }
    out
}
