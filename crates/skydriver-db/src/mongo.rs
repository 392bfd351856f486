//! MongoDB-backed `DocumentStore`. Collection names and indexes match
//! spec.md §6's persisted state layout exactly; every write that needs to
//! be atomic goes through `find_one_and_update` rather than read-modify-write.

use crate::error::StoreError;
use crate::patch::ManifestPatch;
use crate::store::{apply_manifest_patch, DocumentStore};
use crate::{
    I3_EVENTS_COLL, K8S_JOBS_COLL, MANIFESTS_COLL, RESULTS_COLL, SCAN_BACKLOG_COLL,
    SCAN_REQUESTS_COLL,
};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use skydriver_core::{BacklogEntry, K8sJobDoc, Manifest, ScanRequest, ScanResult};

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            db: client.database(db_name),
        })
    }

    fn manifests(&self) -> Collection<Manifest> {
        self.db.collection(MANIFESTS_COLL)
    }
    fn results(&self) -> Collection<ScanResult> {
        self.db.collection(RESULTS_COLL)
    }
    fn requests(&self) -> Collection<ScanRequest> {
        self.db.collection(SCAN_REQUESTS_COLL)
    }
    fn backlog(&self) -> Collection<BacklogEntry> {
        self.db.collection(SCAN_BACKLOG_COLL)
    }
    fn jobs(&self) -> Collection<K8sJobDoc> {
        self.db.collection(K8S_JOBS_COLL)
    }

    /// Builds every index named in spec.md §6. Safe to call on every
    /// startup: index creation is idempotent given identical keys/options.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = |keys| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };

        self.manifests()
            .create_index(unique(doc! {"scan_id": 1}))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.manifests()
            .create_index(IndexModel::builder().keys(doc! {"ewms_workflow_id": 1}).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.manifests()
            .create_index(IndexModel::builder().keys(
                doc! {"event_metadata.event_id": -1, "event_metadata.run_id": -1},
            ).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.results()
            .create_index(unique(doc! {"scan_id": 1}))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.backlog()
            .create_index(IndexModel::builder().keys(doc! {"timestamp": 1}).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.backlog()
            .create_index(IndexModel::builder().keys(doc! {"priority": -1}).build())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.backlog()
            .create_index(unique(doc! {"scan_id": 1}))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.requests()
            .create_index(unique(doc! {"scan_id": 1}))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.jobs()
            .create_index(unique(doc! {"scan_id": 1}))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let i3_events: Collection<mongodb::bson::Document> = self.db.collection(I3_EVENTS_COLL);
        i3_events
            .create_index(unique(doc! {"i3_event_id": 1}))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert_scan_request(&self, request: &ScanRequest) -> Result<(), StoreError> {
        self.requests()
            .insert_one(request)
            .await
            .map_err(|e| duplicate_or_backend(e, &request.scan_id))?;
        Ok(())
    }

    async fn get_scan_request(&self, scan_id: &str) -> Result<ScanRequest, StoreError> {
        self.requests()
            .find_one(doc! {"scan_id": scan_id})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))
    }

    async fn append_rescan_id(
        &self,
        scan_id: &str,
        new_scan_id: &str,
    ) -> Result<(), StoreError> {
        let result = self
            .requests()
            .update_one(
                doc! {"scan_id": scan_id},
                doc! {"$push": {"rescan_ids": new_scan_id}},
            )
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(scan_id.to_string()));
        }
        Ok(())
    }

    async fn insert_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        self.manifests()
            .insert_one(manifest)
            .await
            .map_err(|e| duplicate_or_backend(e, &manifest.scan_id))?;
        Ok(())
    }

    async fn get_manifest(
        &self,
        scan_id: &str,
        include_deleted: bool,
    ) -> Result<Manifest, StoreError> {
        let mut filter = doc! {"scan_id": scan_id};
        if !include_deleted {
            filter.insert("is_deleted", false);
        }
        self.manifests()
            .find_one(filter)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))
    }

    async fn patch_manifest(
        &self,
        scan_id: &str,
        patch: ManifestPatch,
        now: f64,
    ) -> Result<Manifest, StoreError> {
        // Read-validate-write under the document's own atomicity: Mongo
        // guarantees single-document find_one_and_update is atomic, so we
        // apply the patch logic locally then push the fully-resolved
        // document back with a predicate that no concurrent writer beat us
        // (last_updated can only advance).
        let current = self.get_manifest(scan_id, true).await?;
        let mut updated = current.clone();
        apply_manifest_patch(&mut updated, patch, now)?;

        let opts = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let result = self
            .manifests()
            .find_one_and_update(
                doc! {"scan_id": scan_id, "last_updated": {"$lte": current.last_updated}},
                doc! {"$set": mongodb::bson::to_bson(&updated)
                    .map_err(|e| StoreError::Backend(e.to_string()))?},
            )
            .with_options(opts)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        result.ok_or_else(|| StoreError::NotFound(scan_id.to_string()))
    }

    async fn mark_manifest_deleted(&self, scan_id: &str) -> Result<(), StoreError> {
        let result = self
            .manifests()
            .update_one(doc! {"scan_id": scan_id}, doc! {"$set": {"is_deleted": true}})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(scan_id.to_string()));
        }
        Ok(())
    }

    async fn insert_k8s_job_doc(&self, doc: &K8sJobDoc) -> Result<(), StoreError> {
        self.jobs()
            .insert_one(doc)
            .await
            .map_err(|e| duplicate_or_backend(e, &doc.scan_id))?;
        Ok(())
    }

    async fn get_k8s_job_doc(&self, scan_id: &str) -> Result<K8sJobDoc, StoreError> {
        self.jobs()
            .find_one(doc! {"scan_id": scan_id})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(scan_id.to_string()))
    }

    async fn get_result(
        &self,
        scan_id: &str,
        include_deleted: bool,
    ) -> Result<Option<ScanResult>, StoreError> {
        let _ = include_deleted;
        self.results()
            .find_one(doc! {"scan_id": scan_id})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn put_result(
        &self,
        scan_id: &str,
        skyscan_result: serde_json::Map<String, serde_json::Value>,
        is_final: bool,
    ) -> Result<ScanResult, StoreError> {
        if skyscan_result.is_empty() {
            return self
                .get_result(scan_id, true)
                .await?
                .ok_or_else(|| StoreError::NotFound(scan_id.to_string()));
        }
        let result_bson = mongodb::bson::to_bson(&skyscan_result)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let opts = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        // is_final is monotone: only $set it true, or $set it false when
        // the field does not yet exist (handled by the upsert default).
        let update = if is_final {
            doc! {"$set": {"scan_id": scan_id, "skyscan_result": result_bson, "is_final": true}}
        } else {
            doc! {
                "$set": {"scan_id": scan_id, "skyscan_result": result_bson},
                "$setOnInsert": {"is_final": false},
            }
        };

        self.results()
            .find_one_and_update(doc! {"scan_id": scan_id}, update)
            .with_options(opts)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::Backend("upsert returned no document".to_string()))
    }

    async fn enqueue_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError> {
        self.backlog()
            .insert_one(entry)
            .await
            .map_err(|e| duplicate_or_backend(e, &entry.scan_id))?;
        Ok(())
    }

    async fn claim_next_backlog(
        &self,
        now: f64,
        stale_threshold_secs: f64,
        include_low_priority: bool,
    ) -> Result<Option<BacklogEntry>, StoreError> {
        let stale_before = now - stale_threshold_secs;
        let mut filter = doc! {
            "$or": [
                {"pending_timestamp": Bson::Null},
                {"pending_timestamp": {"$lte": stale_before}},
            ],
        };
        if !include_low_priority {
            filter.insert("priority", doc! {"$gte": skydriver_core::HIGH_THRESHOLD});
        }

        let opts = FindOneAndUpdateOptions::builder()
            .sort(doc! {"priority": -1, "timestamp": 1})
            .return_document(ReturnDocument::After)
            .build();

        let claimed = self
            .backlog()
            .find_one_and_update(
                filter,
                doc! {"$set": {"pending_timestamp": now}, "$inc": {"next_attempt": 1}},
            )
            .with_options(opts)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(claimed)
    }

    async fn remove_backlog_entry(&self, scan_id: &str) -> Result<(), StoreError> {
        self.backlog()
            .delete_one(doc! {"scan_id": scan_id})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_backlog(&self) -> Result<Vec<BacklogEntry>, StoreError> {
        use futures::stream::TryStreamExt;
        self.backlog()
            .find(doc! {})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_manifests_started_between(
        &self,
        after: f64,
        before: f64,
    ) -> Result<Vec<Manifest>, StoreError> {
        use futures::stream::TryStreamExt;
        self.manifests()
            .find(doc! {"timestamp": {"$gte": after, "$lte": before}})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_scan_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        use futures::stream::TryStreamExt;
        let docs: Vec<Manifest> = self
            .manifests()
            .find(doc! {"scan_id": {"$in": ids}})
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(docs.into_iter().map(|m| m.scan_id).collect())
    }
}

fn duplicate_or_backend(err: mongodb::error::Error, scan_id: &str) -> StoreError {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we)) =
        err.kind.as_ref()
    {
        if we.code == 11000 {
            return StoreError::AlreadyExists(scan_id.to_string());
        }
    }
    StoreError::Backend(err.to_string())
}
