//! Segmented transfers between the local filesystem and a `RemoteStore`.
//!
//! Objects up to `segment_size` bytes are stored whole. Larger ones are split
//! into `ceil(size / segment_size)` segments in `"{container}_segments"` under
//! `"{key}/{index:08}"`, followed by an empty manifest object at `key` that
//! references the segment prefix. After a successful upload the segment set
//! of a key is exactly `1..=count`; trailing segments left by an earlier,
//! longer upload are pruned, and a whole upload removes them all.
//!
//! Every method that writes to the store takes `&mut self`. One engine is the
//! single writer for its store; the segments-container check and the pruning
//! step both assume no concurrent writer touches the same key.

use super::{
    hasher::{self, ContentHash},
    local_fs,
    progress::{ErrorSink, ProgressSink},
    remote::{PutRequest, RemoteStore, StoreError, list_all},
};
use crate::{
    errors::{TransferError, TransferResult},
    models::{
        DEFAULT_CONTENT_TYPE, DIRECTORY_CONTENT_TYPE,
        comparison::ComparisonItem,
        entry::{LocalEntry, RemoteEntry, join_key},
        segment::{
            ManifestRef, SegmentDescriptor, parse_segment_index, segment_count, segment_prefix,
            segments_container,
        },
    },
};
use bytes::Bytes;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default segment size: 1 GiB, comfortably below Swift's 5 GiB object limit.
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Upload lifecycle, logged at each transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Planning,
    SegmentingAndUploading,
    ManifestWriting,
    Pruning,
    Done,
    Failed,
}

/// Why an upload was, or was not, skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipDecision {
    Proceed,
    /// Remote content already equals the local content.
    Identical,
    /// Contents differ but overwriting was not requested.
    KeepExisting,
}

impl SkipDecision {
    pub fn is_skip(self) -> bool {
        self != Self::Proceed
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Skipped(SkipDecision),
    Whole(RemoteEntry),
    Segmented {
        manifest: RemoteEntry,
        segments: Vec<SegmentDescriptor>,
        pruned: usize,
    },
}

/// Content identity of a remote object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub hash: ContentHash,
    /// Logical size; the sum of segment sizes for segmented objects.
    pub size: u64,
    /// Present iff the object is segmented.
    pub segments: Option<Vec<SegmentDescriptor>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct TransferEngine<S> {
    store: S,
    segment_size: u64,
    /// Largest single buffer the engine may hold; larger windows fail as
    /// `OutOfMemory` instead of being allocated.
    buffer_limit: Option<u64>,
}

impl<S: RemoteStore> TransferEngine<S> {
    pub fn new(store: S, segment_size: u64) -> TransferResult<Self> {
        if segment_size == 0 {
            return Err(TransferError::InvalidSegmentSize);
        }
        Ok(Self {
            store,
            segment_size,
            buffer_limit: None,
        })
    }

    pub fn with_buffer_limit(mut self, bytes: u64) -> Self {
        self.buffer_limit = Some(bytes);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Segment count for an upload of `total_size` bytes, or `None` when the
    /// object fits in a single put.
    pub fn plan(&self, total_size: u64) -> TransferResult<Option<u32>> {
        if total_size <= self.segment_size {
            return Ok(None);
        }
        self.count_segments(total_size).map(Some)
    }

    fn count_segments(&self, total_size: u64) -> TransferResult<u32> {
        segment_count(total_size, self.segment_size).ok_or(TransferError::TooManySegments {
            size: total_size,
            segment_size: self.segment_size,
        })
    }

    /// Segments stored for `object_key` in the segments container of
    /// `container`, ascending by index. Unrelated keys sharing the prefix are
    /// ignored.
    pub async fn list_segments(
        &self,
        container: &str,
        object_key: &str,
    ) -> TransferResult<Vec<SegmentDescriptor>> {
        self.list_segments_in(&segments_container(container), object_key)
            .await
    }

    async fn list_segments_in(
        &self,
        segments_container: &str,
        object_key: &str,
    ) -> TransferResult<Vec<SegmentDescriptor>> {
        if !self.store.container_exists(segments_container).await? {
            return Ok(Vec::new());
        }
        let listed = list_all(&self.store, segments_container, &segment_prefix(object_key)).await?;
        let mut segments: Vec<SegmentDescriptor> = listed
            .into_iter()
            .filter_map(|entry| {
                let index = parse_segment_index(object_key, &entry.key)?;
                Some(SegmentDescriptor {
                    index,
                    key: entry.key,
                    size: entry.size,
                    hash: ContentHash::parse(&entry.etag),
                })
            })
            .collect();
        segments.sort_by_key(|s| s.index);
        Ok(segments)
    }

    /// Segments referenced by `entry`'s manifest, or `None` if the entry is
    /// not segmented (no manifest, an unparsable one, or no segment with
    /// index 1).
    pub async fn segments_of(
        &self,
        entry: &RemoteEntry,
    ) -> TransferResult<Option<Vec<SegmentDescriptor>>> {
        let Some(raw) = entry.manifest.as_deref() else {
            return Ok(None);
        };
        let Some(manifest) = ManifestRef::parse(raw) else {
            warn!("ignoring malformed manifest `{}` on `{}`", raw, entry.key);
            return Ok(None);
        };
        let segments = self
            .list_segments_in(&manifest.container, manifest.object_key())
            .await?;
        if segments.first().is_some_and(|s| s.index == 1) {
            Ok(Some(segments))
        } else {
            Ok(None)
        }
    }

    /// Hash and logical size of a remote object. Segmented objects hash to
    /// the hash of their segment hashes; nothing is downloaded.
    pub async fn remote_identity(&self, entry: &RemoteEntry) -> TransferResult<RemoteIdentity> {
        match self.segments_of(entry).await? {
            Some(segments) => Ok(RemoteIdentity {
                hash: hasher::hash_segmented(segments.iter().map(|s| &s.hash)),
                size: segments.iter().map(|s| s.size).sum(),
                segments: Some(segments),
            }),
            None => Ok(RemoteIdentity {
                hash: ContentHash::parse(&entry.etag),
                size: entry.size,
                segments: None,
            }),
        }
    }

    /// Hash of a local file in the requested shape.
    pub async fn local_hash(&self, path: &Path, segmented: bool) -> io::Result<ContentHash> {
        if segmented {
            Ok(hasher::hash_file_segmented(path, self.segment_size)
                .await?
                .aggregate)
        } else {
            hasher::hash_file(path).await
        }
    }

    /// Decide whether uploading `local` over `remote` can be skipped.
    ///
    /// The local file is hashed in the same shape (whole or segmented) as the
    /// remote object. Identical content is always skipped; differing content
    /// is skipped unless `overwrite` is set.
    pub async fn should_skip(
        &self,
        remote: &RemoteEntry,
        local: &LocalEntry,
        overwrite: bool,
    ) -> TransferResult<SkipDecision> {
        if !remote.exists || remote.is_directory_marker {
            return Ok(SkipDecision::Proceed);
        }
        let identity = self.remote_identity(remote).await?;
        let identical = identity.size == local.size
            && self
                .local_hash(&local.path, identity.segments.is_some())
                .await?
                == identity.hash;
        Ok(match (identical, overwrite) {
            (true, _) => SkipDecision::Identical,
            (false, false) => SkipDecision::KeepExisting,
            (false, true) => SkipDecision::Proceed,
        })
    }

    /// Upload one local file to `key`, segmenting it when it is larger than
    /// the segment size.
    pub async fn upload_file(
        &mut self,
        container: &str,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
        overwrite: bool,
        progress: &dyn ProgressSink,
    ) -> TransferResult<UploadOutcome> {
        let local = LocalEntry::stat(path).await?;
        if !local.exists {
            return Err(TransferError::LocalNotFound(path.display().to_string()));
        }
        if local.is_directory {
            return Err(TransferError::IsDirectory(path.display().to_string()));
        }
        let plan = self.plan(local.size)?;

        self.store.ensure_container(container).await?;
        let remote = self
            .store
            .head(container, key)
            .await?
            .unwrap_or_else(|| RemoteEntry::missing(key));
        let decision = self.should_skip(&remote, &local, overwrite).await?;
        if decision.is_skip() {
            info!("skipping upload of `{}` ({:?})", key, decision);
            progress.on_progress(1.0, key, 1.0, "skipped");
            return Ok(UploadOutcome::Skipped(decision));
        }

        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        if plan.is_some() {
            return self
                .upload_as_segments(container, key, path, local.size, content_type, progress)
                .await;
        }

        let mut file = File::open(path).await?;
        let body = read_window(&mut file, key, local.size, self.buffer_limit).await?;
        let entry = self
            .store
            .put(container, key, PutRequest::new(body, content_type))
            .await?;
        info!("uploaded `{}` ({} bytes)", key, local.size);

        // The put replaced any manifest, so segments of an earlier segmented
        // upload are unreachable from here on.
        let stale = self.list_segments(container, key).await?;
        let pruned = self
            .delete_segments(&segments_container(container), &stale)
            .await?;
        if pruned > 0 {
            info!("pruned {} segments of `{}` after a whole upload", pruned, key);
        }
        progress.on_progress(1.0, key, 1.0, "uploaded");
        Ok(UploadOutcome::Whole(entry))
    }

    /// Split `path` into segments, upload them, write the manifest and prune
    /// segments left over from a longer previous upload.
    ///
    /// A failure before the manifest is written leaves the segments uploaded
    /// so far in place; they are superseded by the next successful upload.
    pub async fn upload_as_segments(
        &mut self,
        container: &str,
        key: &str,
        path: &Path,
        total_size: u64,
        content_type: &str,
        progress: &dyn ProgressSink,
    ) -> TransferResult<UploadOutcome> {
        let mut state = UploadState::Planning;
        let result = self
            .run_segmented_upload(
                &mut state,
                container,
                key,
                path,
                total_size,
                content_type,
                progress,
            )
            .await;
        if let Err(err) = &result {
            warn!("segmented upload of `{}` failed in {:?}: {}", key, state, err);
            transition(key, &mut state, UploadState::Failed);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_segmented_upload(
        &mut self,
        state: &mut UploadState,
        container: &str,
        key: &str,
        path: &Path,
        total_size: u64,
        content_type: &str,
        progress: &dyn ProgressSink,
    ) -> TransferResult<UploadOutcome> {
        let count = self.count_segments(total_size)?;
        let seg_container = segments_container(container);
        info!(
            "uploading `{}` ({} bytes) as {} segments into `{}`",
            key, total_size, count, seg_container
        );

        self.store.ensure_container(&seg_container).await?;
        let previous = self.list_segments(container, key).await?;

        transition(key, state, UploadState::SegmentingAndUploading);
        let mut file = File::open(path).await?;
        let mut segments = Vec::with_capacity(count as usize);
        for index in 1..=count {
            let offset = u64::from(index - 1) * self.segment_size;
            let len = self.segment_size.min(total_size - offset);
            let body = read_window(&mut file, key, len, self.buffer_limit).await?;
            let hash = hasher::hash_bytes(&body);
            let segment = SegmentDescriptor::new(key, index, len, hash);
            self.store
                .put(&seg_container, &segment.key, PutRequest::new(body, content_type))
                .await?;
            debug!("uploaded segment {} of {} ({} bytes, {})", index, count, len, segment.hash);
            segments.push(segment);
            let done = f64::from(index) / f64::from(count);
            progress.on_progress(done, key, done, &format!("segment {index}/{count}"));
        }

        transition(key, state, UploadState::ManifestWriting);
        let manifest_ref = ManifestRef::for_object(container, key);
        let manifest = self
            .store
            .put(
                container,
                key,
                PutRequest::new(Bytes::new(), content_type)
                    .with_manifest(manifest_ref.to_header_value()),
            )
            .await?;

        transition(key, state, UploadState::Pruning);
        let stale: Vec<SegmentDescriptor> =
            previous.into_iter().filter(|s| s.index > count).collect();
        let pruned = self.delete_segments(&seg_container, &stale).await?;
        if pruned > 0 {
            info!("pruned {} stale segments of `{}`", pruned, key);
        }

        transition(key, state, UploadState::Done);
        Ok(UploadOutcome::Segmented {
            manifest,
            segments,
            pruned,
        })
    }

    /// Download `entry` to `target`, concatenating segments if it has a
    /// manifest. The target is written through a temporary sibling file and
    /// only renamed into place once every byte has arrived.
    pub async fn download(
        &self,
        container: &str,
        entry: &RemoteEntry,
        target: &Path,
        progress: &dyn ProgressSink,
    ) -> TransferResult<u64> {
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = match self
            .download_into(container, entry, &tmp_path, progress)
            .await
        {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, target).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(target).await?;
                fs::rename(&tmp_path, target).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }
        info!("downloaded `{}` to {} ({} bytes)", entry.key, target.display(), written);
        Ok(written)
    }

    async fn download_into(
        &self,
        container: &str,
        entry: &RemoteEntry,
        tmp_path: &Path,
        progress: &dyn ProgressSink,
    ) -> TransferResult<u64> {
        let mut file = File::create(tmp_path).await?;
        let written = match &entry.manifest {
            None => {
                self.stream_object(container, &entry.key, entry.size, &mut file, 0, entry.size, progress)
                    .await?
            }
            Some(raw) => {
                let manifest =
                    ManifestRef::parse(raw).ok_or_else(|| TransferError::InvalidManifest {
                        key: entry.key.clone(),
                        manifest: raw.to_string(),
                    })?;
                let segments = self
                    .list_segments_in(&manifest.container, manifest.object_key())
                    .await?;
                check_contiguous(&entry.key, &segments)?;
                let total: u64 = segments.iter().map(|s| s.size).sum();
                let mut written = 0;
                for segment in &segments {
                    written += self
                        .stream_object(
                            &manifest.container,
                            &segment.key,
                            segment.size,
                            &mut file,
                            written,
                            total,
                            progress,
                        )
                        .await?;
                    debug!("appended segment {} of `{}`", segment.index, entry.key);
                }
                written
            }
        };
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Copy one object's body into `file`, reporting progress per chunk
    /// against the whole download (`done_before` / `total`).
    #[allow(clippy::too_many_arguments)]
    async fn stream_object(
        &self,
        container: &str,
        key: &str,
        expected: u64,
        file: &mut File,
        done_before: u64,
        total: u64,
        progress: &dyn ProgressSink,
    ) -> TransferResult<u64> {
        let mut object = self.store.get(container, key).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = object.body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            let overall = fraction(done_before + written, total);
            progress.on_progress(overall, key, fraction(written, expected), "downloading");
        }
        Ok(written)
    }

    /// Zero-byte object flagged as a directory.
    pub async fn create_directory_marker(
        &mut self,
        container: &str,
        key: &str,
    ) -> TransferResult<RemoteEntry> {
        self.store.ensure_container(container).await?;
        let entry = self
            .store
            .put(
                container,
                key,
                PutRequest::new(Bytes::new(), DIRECTORY_CONTENT_TYPE),
            )
            .await?;
        debug!("created directory marker `{}`", key);
        Ok(entry)
    }

    /// Delete an object; for a manifest, every segment goes with it.
    pub async fn delete_object(&mut self, container: &str, key: &str) -> TransferResult<()> {
        let Some(entry) = self.store.head(container, key).await? else {
            return Err(StoreError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            }
            .into());
        };
        if let Some(manifest) = entry.manifest.as_deref().and_then(ManifestRef::parse) {
            let segments = self
                .list_segments_in(&manifest.container, manifest.object_key())
                .await?;
            let deleted = self.delete_segments(&manifest.container, &segments).await?;
            debug!("deleted {} segments of `{}`", deleted, key);
        }
        self.store.delete(container, key).await?;
        info!("deleted `{}` from `{}`", key, container);
        Ok(())
    }

    /// Delete `segments` from `seg_container`, counting the ones actually
    /// removed. Segments already gone are not an error.
    async fn delete_segments(
        &mut self,
        seg_container: &str,
        segments: &[SegmentDescriptor],
    ) -> TransferResult<usize> {
        let mut deleted = 0;
        for segment in segments {
            match self.store.delete(seg_container, &segment.key).await {
                Ok(()) => deleted += 1,
                Err(StoreError::ObjectNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(deleted)
    }

    /// Directory marker for a batch upload; an existing marker is left alone
    /// and a non-marker object is only replaced when `overwrite` is set.
    async fn sync_directory_marker(
        &mut self,
        container: &str,
        key: &str,
        overwrite: bool,
    ) -> TransferResult<UploadOutcome> {
        match self.store.head(container, key).await? {
            Some(existing) if existing.is_directory_marker => {
                Ok(UploadOutcome::Skipped(SkipDecision::Identical))
            }
            Some(_) if !overwrite => Ok(UploadOutcome::Skipped(SkipDecision::KeepExisting)),
            _ => self
                .create_directory_marker(container, key)
                .await
                .map(UploadOutcome::Whole),
        }
    }

    /// Upload everything below `local_dir` under `remote_prefix`.
    ///
    /// Directories become directory markers. Per-object failures go to
    /// `errors` and the batch continues; cancellation is checked between
    /// objects. An error that stops the batch (out of memory) is returned
    /// instead of being reported.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_directory(
        &mut self,
        local_dir: &Path,
        container: &str,
        remote_prefix: &str,
        overwrite: bool,
        progress: &dyn ProgressSink,
        errors: &dyn ErrorSink,
        cancel: &CancellationToken,
    ) -> TransferResult<BatchSummary> {
        let listings = local_fs::enumerate(local_dir).await?;
        self.store.ensure_container(container).await?;
        let total = listings.len();
        let mut summary = BatchSummary::default();

        for (done, listing) in listings.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("directory upload cancelled after {} of {} items", done, total);
                summary.cancelled = true;
                break;
            }
            let key = join_key(remote_prefix, &listing.rel_key);
            let overall = fraction(done as u64, total as u64);
            progress.on_progress(overall, &listing.rel_key, 0.0, &key);

            let result = if listing.entry.is_directory {
                self.sync_directory_marker(container, &key, overwrite).await
            } else {
                let item_progress = |_: f64, _: &str, item: f64, msg: &str| {
                    progress.on_progress(overall, &listing.rel_key, item, msg);
                };
                self.upload_file(container, &key, &listing.entry.path, None, overwrite, &item_progress)
                    .await
            };
            match result {
                Ok(UploadOutcome::Skipped(_)) => summary.skipped += 1,
                Ok(_) => summary.transferred += 1,
                Err(err) if err.is_fatal_for_batch() => return Err(err),
                Err(err) => {
                    errors.on_error(&key, &err);
                    summary.failed += 1;
                }
            }
        }
        progress.on_progress(1.0, "done", 1.0, "");
        Ok(summary)
    }

    /// Download every object under `prefix` into `local_dir`, keyed by the
    /// part of the key after the prefix. Failures are handled as in
    /// `upload_directory`.
    pub async fn download_prefix(
        &self,
        container: &str,
        prefix: &str,
        local_dir: &Path,
        progress: &dyn ProgressSink,
        errors: &dyn ErrorSink,
        cancel: &CancellationToken,
    ) -> TransferResult<BatchSummary> {
        let entries = list_all(&self.store, container, prefix).await?;
        let total = entries.len();
        let mut summary = BatchSummary::default();

        for (done, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("download cancelled after {} of {} objects", done, total);
                summary.cancelled = true;
                break;
            }
            let rel = entry.key.strip_prefix(prefix).unwrap_or(&entry.key);
            let target = local_fs::local_path_for(local_dir, rel);
            let overall = fraction(done as u64, total as u64);
            progress.on_progress(overall, &entry.key, 0.0, "");

            let result = if entry.is_directory_marker {
                fs::create_dir_all(&target)
                    .await
                    .map(|_| 0)
                    .map_err(TransferError::from)
            } else {
                let item_progress = |_: f64, _: &str, item: f64, msg: &str| {
                    progress.on_progress(overall, &entry.key, item, msg);
                };
                self.download(container, entry, &target, &item_progress).await
            };
            match result {
                Ok(_) => summary.transferred += 1,
                Err(err) if err.is_fatal_for_batch() => return Err(err),
                Err(err) => {
                    errors.on_error(&entry.key, &err);
                    summary.failed += 1;
                }
            }
        }
        progress.on_progress(1.0, "done", 1.0, "");
        Ok(summary)
    }

    /// Delete every object under `prefix`, segments included.
    pub async fn delete_prefix(
        &mut self,
        container: &str,
        prefix: &str,
        errors: &dyn ErrorSink,
        cancel: &CancellationToken,
    ) -> TransferResult<BatchSummary> {
        let entries = list_all(&self.store, container, prefix).await?;
        let mut summary = BatchSummary::default();
        for entry in &entries {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match self.delete_object(container, &entry.key).await {
                Ok(()) => summary.transferred += 1,
                Err(err) => {
                    errors.on_error(&entry.key, &err);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Push a local comparison item to its remote key.
    pub async fn upload_item(
        &mut self,
        container: &str,
        item: &ComparisonItem,
        overwrite: bool,
        progress: &dyn ProgressSink,
    ) -> TransferResult<UploadOutcome> {
        match item {
            ComparisonItem::Local(local) if local.entry.is_directory => self
                .create_directory_marker(container, &local.remote_full_name)
                .await
                .map(UploadOutcome::Whole),
            ComparisonItem::Local(local) => {
                self.upload_file(
                    container,
                    &local.remote_full_name,
                    &local.entry.path,
                    None,
                    overwrite,
                    progress,
                )
                .await
            }
            ComparisonItem::Remote(remote) => {
                Err(TransferError::LocalNotFound(remote.local_path.display().to_string()))
            }
        }
    }

    /// Pull a remote comparison item to its local path.
    pub async fn download_item(
        &self,
        container: &str,
        item: &ComparisonItem,
        progress: &dyn ProgressSink,
    ) -> TransferResult<u64> {
        match item {
            ComparisonItem::Remote(remote) if remote.entry.is_directory_marker => {
                fs::create_dir_all(&remote.local_path).await?;
                Ok(0)
            }
            ComparisonItem::Remote(remote) => {
                self.download(container, &remote.entry, &remote.local_path, progress)
                    .await
            }
            ComparisonItem::Local(local) => Err(StoreError::ObjectNotFound {
                container: container.to_string(),
                key: local.remote_full_name.clone(),
            }
            .into()),
        }
    }

    /// Delete whichever side the item stands for.
    pub async fn delete_item(&mut self, container: &str, item: &ComparisonItem) -> TransferResult<()> {
        match item {
            ComparisonItem::Remote(remote) => self.delete_object(container, &remote.entry.key).await,
            ComparisonItem::Local(local) if local.entry.is_directory => {
                fs::remove_dir_all(&local.entry.path).await?;
                Ok(())
            }
            ComparisonItem::Local(local) => {
                fs::remove_file(&local.entry.path).await?;
                Ok(())
            }
        }
    }
}

fn transition(key: &str, state: &mut UploadState, next: UploadState) {
    debug!("upload `{}`: {:?} -> {:?}", key, state, next);
    *state = next;
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

/// Segments must be numbered `1..=n` without holes.
fn check_contiguous(key: &str, segments: &[SegmentDescriptor]) -> TransferResult<()> {
    let mut expected = 1;
    for segment in segments {
        if segment.index != expected {
            return Err(TransferError::MissingSegment {
                key: key.to_string(),
                index: expected,
            });
        }
        expected += 1;
    }
    if segments.is_empty() {
        return Err(TransferError::MissingSegment {
            key: key.to_string(),
            index: 1,
        });
    }
    Ok(())
}

/// Read the next `len` bytes of `file` into a freshly allocated buffer.
/// Allocation failure is reported instead of aborting the process.
async fn read_window(
    file: &mut File,
    key: &str,
    len: u64,
    limit: Option<u64>,
) -> TransferResult<Bytes> {
    let oom = || TransferError::OutOfMemory {
        key: key.to_string(),
        bytes: len,
    };
    if limit.is_some_and(|limit| len > limit) {
        return Err(oom());
    }
    let size = usize::try_from(len).map_err(|_| oom())?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| oom())?;
    buf.resize(size, 0);
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
