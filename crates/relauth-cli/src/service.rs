use std::sync::Arc;

use relauth_core::engine::{
    CheckEngine, CheckRequest, CheckResult, EngineConfig, ExpandEngine, ExpandRequest,
    LookupCursor, LookupEngine, LookupPage, LookupResourcesRequest, LookupSubjectsRequest,
    SubjectSetTree,
};
use relauth_core::schema::{Schema, SchemaLimits, parse_schema_with_limits};
use relauth_core::tuple::{ObjectRef, SnapshotToken, SubjectRef, TupleWrite};
use relauth_storage::{InMemoryStore, RelationshipStore, StoreTupleReader};

use crate::error::AppError;

type Reader = StoreTupleReader<InMemoryStore>;

/// A compiled schema over an in-memory store, with one engine per kind of
/// query.
pub struct AuthzService {
    store: Arc<InMemoryStore>,
    schema: Arc<Schema>,
    check: CheckEngine<Reader>,
    expand: ExpandEngine<Reader>,
    lookup: LookupEngine<Reader>,
    page_size: usize,
}

impl AuthzService {
    pub fn new(
        schema_source: &str,
        limits: &SchemaLimits,
        engine_config: EngineConfig,
        page_size: usize,
    ) -> Result<Self, AppError> {
        let schema = Arc::new(parse_schema_with_limits(schema_source, limits)?);
        let store = Arc::new(InMemoryStore::new());
        let reader = Arc::new(StoreTupleReader::new(Arc::clone(&store)));

        let check = CheckEngine::new(
            Arc::clone(&reader),
            Arc::clone(&schema),
            engine_config.clone(),
        );
        let expand = ExpandEngine::new(
            Arc::clone(&reader),
            Arc::clone(&schema),
            engine_config.clone(),
        );
        Ok(Self {
            check,
            expand,
            lookup: LookupEngine::new(reader, Arc::clone(&schema), engine_config),
            store,
            schema,
            page_size,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Stores the tuples in one transaction and returns its snapshot.
    pub async fn write_tuples(&self, writes: &[TupleWrite]) -> Result<SnapshotToken, AppError> {
        let snapshot = self.store.write(writes, &[]).await?;
        tracing::info!(count = writes.len(), snapshot = %snapshot, "tuples loaded");
        Ok(snapshot)
    }

    pub async fn check(
        &self,
        object: ObjectRef,
        permission: String,
        subject: SubjectRef,
        snapshot: Option<SnapshotToken>,
    ) -> Result<CheckResult, AppError> {
        let request = CheckRequest {
            object,
            permission,
            subject,
            snapshot,
        };
        Ok(self.check.check(&request).await?)
    }

    pub async fn expand(
        &self,
        object: ObjectRef,
        permission: String,
        snapshot: Option<SnapshotToken>,
    ) -> Result<SubjectSetTree, AppError> {
        let request = ExpandRequest {
            object,
            permission,
            snapshot,
        };
        Ok(self.expand.expand(&request).await?)
    }

    pub async fn lookup_resources(
        &self,
        resource_type: String,
        permission: String,
        subject: SubjectRef,
        snapshot: Option<SnapshotToken>,
        cursor: Option<LookupCursor>,
        page_size: Option<usize>,
    ) -> Result<LookupPage, AppError> {
        let request = LookupResourcesRequest {
            resource_type,
            permission,
            subject,
            snapshot,
            cursor,
            page_size: page_size.unwrap_or(self.page_size),
        };
        Ok(self.lookup.lookup_resources(&request).await?)
    }

    /// `subject_type` may name a subject set as `type#relation`.
    pub async fn lookup_subjects(
        &self,
        object: ObjectRef,
        permission: String,
        subject_type: &str,
        snapshot: Option<SnapshotToken>,
        cursor: Option<LookupCursor>,
        page_size: Option<usize>,
    ) -> Result<LookupPage, AppError> {
        let (subject_type, subject_relation) = match subject_type.split_once('#') {
            Some((ty, relation)) => (ty.to_string(), Some(relation.to_string())),
            None => (subject_type.to_string(), None),
        };
        let request = LookupSubjectsRequest {
            object,
            permission,
            subject_type,
            subject_relation,
            snapshot,
            cursor,
            page_size: page_size.unwrap_or(self.page_size),
        };
        Ok(self.lookup.lookup_subjects(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relauth_core::engine::{CheckError, Decision};
    use relauth_core::schema::SchemaError;

    const SCHEMA: &str = r#"
        entity user {}
        entity team {
            relation member @user @team#member
        }
        entity doc {
            relation owner @user
            relation viewer @user @team#member
            action edit = owner
            action view = edit or viewer
        }
    "#;

    async fn make_service(tuples: &[&str]) -> AuthzService {
        let service =
            AuthzService::new(SCHEMA, &SchemaLimits::default(), EngineConfig::default(), 10)
                .unwrap();
        let writes: Vec<TupleWrite> = tuples
            .iter()
            .map(|t| TupleWrite::from(t.parse::<relauth_core::tuple::Tuple>().unwrap()))
            .collect();
        service.write_tuples(&writes).await.unwrap();
        service
    }

    #[test]
    fn new_rejects_schema_over_limits() {
        let limits = SchemaLimits {
            max_entities: 2,
            ..SchemaLimits::default()
        };

        let result = AuthzService::new(SCHEMA, &limits, EngineConfig::default(), 10);

        assert!(matches!(result, Err(AppError::Schema(SchemaError::Limits(_)))));
    }

    #[tokio::test]
    async fn check_uses_loaded_tuples() {
        let service = make_service(&[
            "doc:1#viewer@team:eng#member",
            "team:eng#member@user:alice",
        ])
        .await;

        let result = service
            .check(
                ObjectRef::new("doc", "1"),
                "view".to_string(),
                SubjectRef::direct("user", "alice"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::Allowed);
        assert_eq!(result.snapshot, SnapshotToken::new(1));
    }

    #[tokio::test]
    async fn check_before_any_write_is_denied() {
        let service = make_service(&["doc:1#owner@user:alice"]).await;

        let result = service
            .check(
                ObjectRef::new("doc", "1"),
                "edit".to_string(),
                SubjectRef::direct("user", "alice"),
                Some(SnapshotToken::new(0)),
            )
            .await
            .unwrap();

        assert_eq!(result.decision, Decision::Denied);
    }

    #[tokio::test]
    async fn lookup_subjects_accepts_subject_sets() {
        let service = make_service(&[
            "doc:1#viewer@team:eng#member",
            "doc:1#viewer@team:ops#member",
            "doc:1#owner@user:alice",
        ])
        .await;

        let teams = service
            .lookup_subjects(
                ObjectRef::new("doc", "1"),
                "view".to_string(),
                "team#member",
                None,
                None,
                None,
            )
            .await
            .unwrap();
        let users = service
            .lookup_subjects(
                ObjectRef::new("doc", "1"),
                "view".to_string(),
                "user",
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(teams.ids, vec!["eng", "ops"]);
        assert_eq!(users.ids, vec!["alice"]);
    }

    #[tokio::test]
    async fn lookup_resources_uses_default_page_size() {
        let tuples: Vec<String> = (0..15)
            .map(|i| format!("doc:{i:02}#owner@user:alice"))
            .collect();
        let tuples: Vec<&str> = tuples.iter().map(String::as_str).collect();
        let service = make_service(&tuples).await;

        let page = service
            .lookup_resources(
                "doc".to_string(),
                "view".to_string(),
                SubjectRef::direct("user", "alice"),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(page.ids.len(), 10);
        assert_eq!(page.next_cursor.map(|c| c.after), Some("09".to_string()));
    }

    #[tokio::test]
    async fn engine_errors_are_wrapped() {
        let service = make_service(&[]).await;

        let err = service
            .expand(ObjectRef::new("folder", "1"), "view".to_string(), None)
            .await
            .unwrap_err();

        assert!(
            matches!(err, AppError::Engine(CheckError::TypeNotFound(ref t)) if t == "folder"),
            "got: {err}"
        );
    }
}
