use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::batch::TransferRequest;
use crate::domain::{SourceUrl, TransferRecord, TransferStatus, sanitize_name};
use crate::error::MirrorError;
use crate::manifest::{Manifest, TutorialContent, find_manifests};
use crate::skiplist::SkipList;
use crate::summary::SummaryWriter;
use crate::target::MirrorTarget;
use crate::transfer::{SourceFetcher, TransferEngine, TransferOutcome};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub manifests_processed: usize,
    pub manifests_failed: usize,
    pub folders_failed: usize,
    pub items: BTreeMap<String, usize>,
    pub total_bytes: u64,
    pub summary_path: Option<String>,
}

impl RunReport {
    fn start() -> Self {
        Self {
            started_at: iso_timestamp(),
            ..Self::default()
        }
    }

    fn record(&mut self, record: &TransferRecord) {
        *self
            .items
            .entry(record.status.kind().to_string())
            .or_default() += 1;
        self.total_bytes += record.size;
    }

    pub fn item_count(&self) -> usize {
        self.items.values().sum()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.items.get(kind).copied().unwrap_or(0)
    }

    pub fn failed_items(&self) -> usize {
        self.count("error") + self.count("upload_failed")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedEntry {
    pub manifest: String,
    pub path: String,
    pub url: String,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub entries: Vec<ListedEntry>,
    pub manifests_failed: usize,
}

#[derive(Debug, Clone)]
pub struct App {
    manifest_name: String,
    skip_list: SkipList,
}

impl App {
    pub fn new(manifest_name: impl Into<String>, skip_list: SkipList) -> Self {
        Self {
            manifest_name: manifest_name.into(),
            skip_list,
        }
    }

    pub fn run<T: MirrorTarget>(
        &self,
        manifest_root: &Utf8Path,
        target: &T,
        summary: &mut SummaryWriter,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MirrorError> {
        let mut report = RunReport::start();
        let started = Instant::now();
        let root = target.root()?;

        for found in find_manifests(manifest_root, &self.manifest_name) {
            let path = match found {
                Ok(path) => path,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    report.manifests_failed += 1;
                    continue;
                }
            };
            sink.event(ProgressEvent {
                message: format!("phase=Manifest; {path}"),
                elapsed: Some(started.elapsed()),
            });
            let manifest = match Manifest::load(&path) {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!(error = %err, "skipping manifest");
                    sink.event(ProgressEvent {
                        message: format!("phase=Manifest; skipped {path}: {err}"),
                        elapsed: Some(started.elapsed()),
                    });
                    report.manifests_failed += 1;
                    continue;
                }
            };
            self.mirror_manifest(&manifest, target, &root, summary, &mut report, sink)?;
            report.manifests_processed += 1;
        }

        report.finished_at = iso_timestamp();
        report.summary_path = Some(summary.path().to_string());
        info!(
            manifests = report.manifests_processed,
            failed_manifests = report.manifests_failed,
            items = report.item_count(),
            bytes = report.total_bytes,
            "mirror run finished"
        );
        Ok(report)
    }

    fn mirror_manifest<T: MirrorTarget>(
        &self,
        manifest: &Manifest,
        target: &T,
        root: &T::Folder,
        summary: &mut SummaryWriter,
        report: &mut RunReport,
        sink: &dyn ProgressSink,
    ) -> Result<(), MirrorError> {
        let destination = sanitize_name(manifest.destination_name());
        let Some(destination_folder) = ensure(target, root, &destination, report, sink) else {
            return Ok(());
        };

        for topic in &manifest.items {
            let topic_name = sanitize_name(topic.name());
            let Some(topic_folder) = ensure(target, &destination_folder, &topic_name, report, sink)
            else {
                continue;
            };

            for tutorial in &topic.items {
                let tutorial_name = sanitize_name(tutorial.name());
                let Some(tutorial_folder) =
                    ensure(target, &topic_folder, &tutorial_name, report, sink)
                else {
                    continue;
                };
                let folders = vec![destination.clone(), topic_name.clone(), tutorial_name];

                match tutorial.content() {
                    TutorialContent::Items(urls) => {
                        for raw in urls {
                            self.process_item(
                                target,
                                &tutorial_folder,
                                &folders,
                                raw,
                                summary,
                                report,
                                sink,
                            )?;
                        }
                    }
                    TutorialContent::Groups(groups) => {
                        for group in groups {
                            let group_name = sanitize_name(group.name);
                            let Some(group_folder) =
                                ensure(target, &tutorial_folder, &group_name, report, sink)
                            else {
                                continue;
                            };
                            let mut group_folders = folders.clone();
                            group_folders.push(group_name);
                            for raw in group.urls {
                                self.process_item(
                                    target,
                                    &group_folder,
                                    &group_folders,
                                    raw,
                                    summary,
                                    report,
                                    sink,
                                )?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_item<T: MirrorTarget>(
        &self,
        target: &T,
        folder: &T::Folder,
        folders: &[String],
        raw: &str,
        summary: &mut SummaryWriter,
        report: &mut RunReport,
        sink: &dyn ProgressSink,
    ) -> Result<(), MirrorError> {
        let outcome = match SourceUrl::parse(raw) {
            Ok(url) => {
                let relative = format!("{}/{}", folders.join("/"), target.file_name(&url));
                if self.skip_list.contains(&url, &relative) {
                    info!(url = %url, "listed in skip list");
                    skipped_listed()
                } else {
                    target.deliver(folder, folders, &url)
                }
            }
            Err(err) => {
                warn!(url = raw, error = %err, "unusable URL");
                TransferOutcome {
                    status: TransferStatus::Error(err.to_string()),
                    size: 0,
                    attempts: 0,
                }
            }
        };

        let record = TransferRecord {
            path: target.folder_label(folder),
            url: raw.to_string(),
            status: outcome.status,
            size: outcome.size,
        };
        self.finish_item(record, summary, report, sink)
    }

    pub fn fetch_list<H: SourceFetcher, F: SourceFetcher>(
        &self,
        requests: &[TransferRequest],
        engine: &TransferEngine<H, F>,
        summary: &mut SummaryWriter,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MirrorError> {
        let mut report = RunReport::start();
        for request in requests {
            let folder = request
                .dest
                .parent()
                .map(|parent| parent.to_string())
                .unwrap_or_default();
            let outcome = match SourceUrl::parse(&request.url) {
                Ok(url) if self.skip_list.contains(&url, request.dest.as_str()) => {
                    skipped_listed()
                }
                Ok(url) => engine.fetch(&url, &request.dest),
                Err(err) => TransferOutcome {
                    status: TransferStatus::Error(err.to_string()),
                    size: 0,
                    attempts: 0,
                },
            };
            let record = TransferRecord {
                path: folder,
                url: request.url.clone(),
                status: outcome.status,
                size: outcome.size,
            };
            self.finish_item(record, summary, &mut report, sink)?;
        }
        report.finished_at = iso_timestamp();
        report.summary_path = Some(summary.path().to_string());
        Ok(report)
    }

    pub fn list_entries(&self, manifest_root: &Utf8Path) -> ListResult {
        let mut entries = Vec::new();
        let mut manifests_failed = 0;
        for found in find_manifests(manifest_root, &self.manifest_name) {
            let manifest = match found.and_then(|path| Manifest::load(&path).map(|m| (path, m))) {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(error = %err, "skipping manifest");
                    manifests_failed += 1;
                    continue;
                }
            };
            let (path, manifest) = manifest;
            for entry in manifest.entries() {
                let folder = entry.folders.join("/");
                let listed = match SourceUrl::parse(&entry.url) {
                    Ok(url) => ListedEntry {
                        manifest: path.to_string(),
                        path: format!("{folder}/{}", url.file_name()),
                        url: url.as_str().to_string(),
                        valid: true,
                    },
                    Err(_) => ListedEntry {
                        manifest: path.to_string(),
                        path: folder,
                        url: entry.url,
                        valid: false,
                    },
                };
                entries.push(listed);
            }
        }
        ListResult {
            entries,
            manifests_failed,
        }
    }

    fn finish_item(
        &self,
        record: TransferRecord,
        summary: &mut SummaryWriter,
        report: &mut RunReport,
        sink: &dyn ProgressSink,
    ) -> Result<(), MirrorError> {
        sink.event(ProgressEvent {
            message: format!(
                "phase=Item; {} {} size={}",
                record.status.kind(),
                record.url,
                record.size
            ),
            elapsed: None,
        });
        if record.status.is_failure() {
            warn!(path = %record.path, url = %record.url, status = %record.status_text(), "item failed");
        }
        summary.append(&record)?;
        report.record(&record);
        Ok(())
    }
}

fn ensure<T: MirrorTarget>(
    target: &T,
    parent: &T::Folder,
    name: &str,
    report: &mut RunReport,
    sink: &dyn ProgressSink,
) -> Option<T::Folder> {
    match target.ensure_folder(parent, name) {
        Ok(folder) => Some(folder),
        Err(err) => {
            warn!(name, error = %err, "failed to ensure folder, skipping branch");
            sink.event(ProgressEvent {
                message: format!("phase=Folder; failed {name}: {err}"),
                elapsed: None,
            });
            report.folders_failed += 1;
            None
        }
    }
}

fn skipped_listed() -> TransferOutcome {
    TransferOutcome {
        status: TransferStatus::SkippedListed,
        size: 0,
        attempts: 0,
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::output::JsonOutput;

    struct FakeTarget {
        fail_folder: Option<String>,
        delivered: RefCell<Vec<(String, String)>>,
    }

    impl MirrorTarget for FakeTarget {
        type Folder = String;

        fn root(&self) -> Result<String, MirrorError> {
            Ok(String::new())
        }

        fn ensure_folder(&self, parent: &String, name: &str) -> Result<String, MirrorError> {
            if self.fail_folder.as_deref() == Some(name) {
                return Err(MirrorError::RemoteStatus {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(format!("{parent}/{name}"))
        }

        fn folder_label(&self, folder: &String) -> String {
            folder.clone()
        }

        fn deliver(&self, folder: &String, _folders: &[String], url: &SourceUrl) -> TransferOutcome {
            self.delivered
                .borrow_mut()
                .push((folder.clone(), url.as_str().to_string()));
            TransferOutcome {
                status: TransferStatus::Downloaded,
                size: 4,
                attempts: 1,
            }
        }
    }

    const TWO_TOPICS: &str = r#"
destination:
  name: GTN
items:
- name: Broken
  items:
  - name: T1
    items:
    - url: https://example.org/one.txt
- name: Working
  items:
  - name: T2
    items:
    - url: https://example.org/two.txt
    - url: not a url
"#;

    #[test]
    fn folder_failure_abandons_only_its_branch() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("manifests").as_std_path()).unwrap();
        fs::write(
            root.join("manifests/data-library.yaml").as_std_path(),
            TWO_TOPICS,
        )
        .unwrap();
        let mut summary = SummaryWriter::create(&root.join("summary.tsv")).unwrap();
        let target = FakeTarget {
            fail_folder: Some("Broken".to_string()),
            delivered: RefCell::new(Vec::new()),
        };
        let app = App::new("data-library.yaml", SkipList::default());

        let report = app
            .run(&root.join("manifests"), &target, &mut summary, &JsonOutput)
            .unwrap();

        assert_eq!(report.folders_failed, 1);
        assert_eq!(report.manifests_processed, 1);
        assert_eq!(
            target.delivered.borrow().as_slice(),
            &[(
                "/GTN/Working/T2".to_string(),
                "https://example.org/two.txt".to_string()
            )]
        );
        assert_eq!(report.count("downloaded"), 1);
        assert_eq!(report.count("error"), 1);
        assert_eq!(summary.rows(), 2);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn list_entries_reports_paths() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::write(root.join("data-library.yaml").as_std_path(), TWO_TOPICS).unwrap();
        fs::create_dir_all(root.join("bad").as_std_path()).unwrap();
        fs::write(root.join("bad/data-library.yaml").as_std_path(), "items: [").unwrap();

        let app = App::new("data-library.yaml", SkipList::default());
        let result = app.list_entries(&root);

        assert_eq!(result.manifests_failed, 1);
        assert_eq!(result.entries.len(), 3);
        assert!(
            result
                .entries
                .iter()
                .any(|entry| entry.path == "GTN/Working/T2/two.txt" && entry.valid)
        );
        assert!(result.entries.iter().any(|entry| !entry.valid));
    }
}
