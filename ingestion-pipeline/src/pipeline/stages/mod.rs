use std::sync::Arc;

use futures::{stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use common::{
    error::AppError,
    storage::types::{
        file_chunk::{ChunkType, FileChunk},
        processing_task::{ProcessingTask, TaskStep},
        repo_file::RepoFile,
        repository::{Repository, RepositoryStatus, TreeNode},
    },
};

use crate::{
    fetcher::RepoLocator,
    parser::{self, Language},
    prompts::{self, EMPTY_REPO_OVERVIEW},
    resolver::{build_dependency_map, FileImports},
};

use super::context::PipelineContext;

/// Stored when every per-file summary failed and the overview has nothing to
/// work from.
const OVERVIEW_UNAVAILABLE: &str =
    "Overview unavailable: file summaries could not be generated for this repository.";

/// Input cap for one chunk's embedding text.
const CHUNK_EMBED_CHAR_LIMIT: usize = 4000;

/// Stage 1: stream tree and blob content into persisted file records.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn fetch_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    ProcessingTask::advance_step(&ctx.task_id, TaskStep::Fetching, ctx.db).await?;

    let repo = Repository::get_required(&ctx.repo_id, ctx.db).await?;
    let locator = RepoLocator {
        owner: repo.owner.clone(),
        name: repo.name.clone(),
    };

    let metadata = ctx.services.fetch_metadata(&locator).await?;
    let entries = ctx
        .services
        .fetch_tree(&locator, &metadata.default_branch)
        .await?;

    ctx.progress.set_total(entries.len() as u64, ctx.db).await?;

    let mut file_tree = TreeNode::folder();
    for entry in &entries {
        file_tree.insert(&entry.path, entry.size, entry.language.clone());
    }

    let locator_ref = &locator;
    let results: Vec<Result<u64, AppError>> = stream::iter(entries.iter().map(|entry| {
        async move {
            match ctx.services.fetch_blob(locator_ref, &entry.sha).await {
                Ok(content) => {
                    let language = entry
                        .language
                        .clone()
                        .unwrap_or_else(|| "text".to_string());
                    let file =
                        RepoFile::new(ctx.repo_id.clone(), entry.path.clone(), language, content);
                    ctx.db.store_item(file).await?;
                    ctx.progress.record(1, ctx.db).await?;
                    Ok(1)
                }
                Err(err) if err.is_stage_fatal() => Err(err),
                Err(err) => {
                    // Single-blob failure: skip the file, keep ingesting.
                    warn!(
                        task_id = %ctx.task_id,
                        path = %entry.path,
                        error = %err,
                        "blob fetch failed; skipping file"
                    );
                    ctx.progress.record(1, ctx.db).await?;
                    Ok(0)
                }
            }
        }
    }))
    .buffer_unordered(ctx.tuning.fetch_concurrency)
    .collect()
    .await;

    let mut file_count = 0u64;
    for result in results {
        file_count = file_count.saturating_add(result?);
    }

    Repository::set_fetch_results(
        &ctx.repo_id,
        metadata.default_branch,
        metadata.description,
        metadata.languages,
        file_tree,
        file_count,
        &ctx.task_id,
        ctx.db,
    )
    .await?;
    ctx.progress.flush(ctx.db).await?;

    debug!(task_id = %ctx.task_id, file_count, "fetch stage complete");
    Ok(())
}

/// Stage 2: parse every file on the blocking pool, bounded by the CPU count.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn parse_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    ProcessingTask::advance_step(&ctx.task_id, TaskStep::Parsing, ctx.db).await?;

    let files = RepoFile::list_for_repo(&ctx.repo_id, ctx.db).await?;
    let semaphore = Arc::new(Semaphore::new(ctx.tuning.parse_concurrency.max(1)));

    for bucket in files.chunks(ctx.tuning.bucket_size) {
        let results: Vec<Result<(), AppError>> = stream::iter(bucket.iter().map(|file| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let Some(language) = Language::from_name(&file.language) else {
                    // Text-eligible but not parseable (markdown, configs).
                    ctx.progress.record(1, ctx.db).await?;
                    return Ok(());
                };

                let permit = semaphore.acquire_owned().await.map_err(|_| {
                    AppError::InternalError("parser semaphore closed".to_string())
                })?;
                let content = file.content.clone();
                let parsed = tokio::task::spawn_blocking(move || {
                    let result = parser::parse_source(language, &content);
                    drop(permit);
                    result
                })
                .await?;

                match parsed {
                    Ok(structure) => {
                        RepoFile::set_parse_result(
                            &file.id,
                            true,
                            structure.functions,
                            structure.classes,
                            structure.imports,
                            ctx.db,
                        )
                        .await?;
                    }
                    Err(err) => {
                        // Parse failures are warn-only; the file keeps its raw
                        // content for the later stages.
                        debug!(
                            task_id = %ctx.task_id,
                            path = %file.path,
                            error = %err,
                            "parse failed; storing file unparsed"
                        );
                        RepoFile::set_parse_result(
                            &file.id,
                            false,
                            Vec::new(),
                            Vec::new(),
                            Vec::new(),
                            ctx.db,
                        )
                        .await?;
                    }
                }

                ctx.progress.record(1, ctx.db).await?;
                Ok(())
            }
        }))
        .buffer_unordered(ctx.tuning.parse_concurrency.max(1))
        .collect()
        .await;

        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        ctx.progress.flush(ctx.db).await?;
    }

    Ok(())
}

/// Fan-out substage: resolve imports over the full file set and invert them.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn dependency_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    let files = RepoFile::list_for_repo(&ctx.repo_id, ctx.db).await?;

    let inputs: Vec<FileImports> = files
        .iter()
        .map(|file| FileImports {
            path: file.path.clone(),
            language: Language::from_name(&file.language),
            imports: file.imports.clone(),
        })
        .collect();

    let map = build_dependency_map(&inputs);

    for file in &files {
        if let Some(dependencies) = map.get(&file.path) {
            RepoFile::set_dependencies(&file.id, dependencies.clone(), ctx.db).await?;
        }
    }

    debug!(task_id = %ctx.task_id, files = files.len(), "dependency stage complete");
    Ok(())
}

/// Fan-out substage: one chunk per function and class, embedded in batches.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn chunk_embedding_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    let files = RepoFile::list_for_repo(&ctx.repo_id, ctx.db).await?;
    let mut dimension_cached = false;

    for bucket in files.chunks(ctx.tuning.bucket_size) {
        let candidates: Vec<ChunkCandidate> = bucket.iter().flat_map(chunk_candidates).collect();
        if candidates.is_empty() {
            continue;
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|candidate| {
                format!(
                    "{}\n\n{}",
                    candidate.chunk_text,
                    prompts::truncate_chars(&candidate.code, CHUNK_EMBED_CHAR_LIMIT)
                )
            })
            .collect();

        let vectors = match embed_grouped(ctx, &texts).await {
            Ok(vectors) => vectors,
            Err(err) if err.is_stage_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    task_id = %ctx.task_id,
                    error = %err,
                    "chunk embedding failed for bucket; recording per-file errors"
                );
                for file in bucket {
                    RepoFile::set_error(&file.id, format!("chunk embedding failed: {err}"), ctx.db)
                        .await?;
                }
                continue;
            }
        };

        if !dimension_cached {
            if let Some(first) = vectors.first() {
                let dimension = first.len();
                Repository::set_embedding_dimensions(&ctx.repo_id, dimension as u64, ctx.db)
                    .await?;
                ctx.db.ensure_initialized(dimension).await?;
                dimension_cached = true;
            }
        }

        for file in bucket {
            FileChunk::delete_by_file(&file.id, ctx.db).await?;
        }

        for (candidate, vector) in candidates.into_iter().zip(vectors) {
            let chunk = FileChunk::new(
                ctx.repo_id.clone(),
                candidate.file_id,
                candidate.path,
                candidate.chunk_type,
                candidate.chunk_name,
                candidate.chunk_text,
                candidate.code,
                candidate.line_start,
                candidate.line_end,
                candidate.parent_class,
                candidate.chunk_index,
                candidate.total_chunks,
                vector,
            );
            ctx.db.store_item(chunk).await?;
        }

        for file in bucket {
            RepoFile::mark_embedded(&file.id, ctx.db).await?;
        }
    }

    Ok(())
}

/// Fan-out substage: one summary call per file, bounded by the LLM cap.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn summarize_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    let files = RepoFile::list_for_repo(&ctx.repo_id, ctx.db).await?;

    for bucket in files.chunks(ctx.tuning.bucket_size) {
        let results: Vec<Result<(), AppError>> = stream::iter(bucket.iter().map(|file| {
            Box::pin(async move {
                match ctx.services.summarize_file(file).await {
                    Ok(summary) => RepoFile::set_summary(&file.id, summary, ctx.db).await,
                    Err(err) if err.is_stage_fatal() => Err(err),
                    Err(err) => {
                        warn!(
                            task_id = %ctx.task_id,
                            path = %file.path,
                            error = %err,
                            "summary failed; file continues without one"
                        );
                        RepoFile::set_error(&file.id, format!("summary failed: {err}"), ctx.db)
                            .await
                    }
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AppError>> + Send + '_>>
        }))
        .buffer_unordered(ctx.tuning.llm_concurrency.max(1))
        .collect()
        .await;

        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        ctx.progress.flush(ctx.db).await?;
    }

    Ok(())
}

/// Stage 4: embed every file summary into the summary index.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn summary_embedding_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    ProcessingTask::advance_step(&ctx.task_id, TaskStep::Summarizing, ctx.db).await?;

    let files = RepoFile::list_for_repo(&ctx.repo_id, ctx.db).await?;
    let summarized: Vec<&RepoFile> = files.iter().filter(|f| f.summary.is_some()).collect();

    for bucket in summarized.chunks(ctx.tuning.bucket_size) {
        let texts: Vec<String> = bucket
            .iter()
            .filter_map(|file| file.summary.clone())
            .collect();

        let vectors = match embed_grouped(ctx, &texts).await {
            Ok(vectors) => vectors,
            Err(err) if err.is_stage_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    task_id = %ctx.task_id,
                    error = %err,
                    "summary embedding failed for bucket"
                );
                for file in bucket {
                    RepoFile::set_error(
                        &file.id,
                        format!("summary embedding failed: {err}"),
                        ctx.db,
                    )
                    .await?;
                }
                continue;
            }
        };

        for (file, vector) in bucket.iter().zip(vectors) {
            RepoFile::set_summary_vector(&file.id, vector, ctx.db).await?;
        }
    }

    Ok(())
}

/// Stage 5: repository overview from the most imported files' summaries.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn overview_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    ProcessingTask::advance_step(&ctx.task_id, TaskStep::Overview, ctx.db).await?;

    let file_count = RepoFile::count_for_repo(&ctx.repo_id, ctx.db).await?;
    if file_count == 0 {
        Repository::set_overview(&ctx.repo_id, EMPTY_REPO_OVERVIEW.to_string(), None, ctx.db)
            .await?;
        return Ok(());
    }

    let top_files = RepoFile::most_imported(&ctx.repo_id, ctx.tuning.overview_top_k, ctx.db).await?;
    let summaries: Vec<(String, String)> = top_files
        .into_iter()
        .filter_map(|file| file.summary.map(|summary| (file.path, summary)))
        .collect();

    if summaries.is_empty() {
        Repository::set_overview(&ctx.repo_id, OVERVIEW_UNAVAILABLE.to_string(), None, ctx.db)
            .await?;
        return Ok(());
    }

    let repo = Repository::get_required(&ctx.repo_id, ctx.db).await?;
    let overview = ctx.services.overview(&repo.name, &summaries).await?;

    let overview_embedding = match ctx.services.embed_texts(&[overview.clone()]).await {
        Ok(mut vectors) => vectors.pop(),
        Err(err) if err.is_stage_fatal() => return Err(err),
        Err(err) => {
            warn!(task_id = %ctx.task_id, error = %err, "overview embedding failed");
            None
        }
    };

    Repository::set_overview(&ctx.repo_id, overview, overview_embedding, ctx.db).await?;
    Ok(())
}

/// Stage 6: flip the repository to completed and close out the task.
#[instrument(level = "trace", skip_all, fields(task_id = %ctx.task_id, repo_id = %ctx.repo_id))]
pub async fn finalize_stage(ctx: &PipelineContext<'_>) -> Result<(), AppError> {
    ProcessingTask::advance_step(&ctx.task_id, TaskStep::Finalizing, ctx.db).await?;

    let file_count = RepoFile::count_for_repo(&ctx.repo_id, ctx.db).await?;

    ctx.progress.flush(ctx.db).await?;
    Repository::transition_status(&ctx.repo_id, RepositoryStatus::Completed, None, ctx.db).await?;
    ProcessingTask::mark_completed(
        &ctx.task_id,
        Some(serde_json::json!({ "file_count": file_count })),
        ctx.db,
    )
    .await?;

    Ok(())
}

struct ChunkCandidate {
    file_id: String,
    path: String,
    chunk_type: ChunkType,
    chunk_name: String,
    chunk_text: String,
    code: String,
    line_start: u32,
    line_end: u32,
    parent_class: Option<String>,
    chunk_index: u32,
    total_chunks: u32,
}

/// One candidate per function and per class, indexed within the file.
fn chunk_candidates(file: &RepoFile) -> Vec<ChunkCandidate> {
    let total = (file.functions.len() + file.classes.len()) as u32;
    if total == 0 {
        return Vec::new();
    }

    let lines: Vec<&str> = file.content.lines().collect();
    let slice = |start: u32, end: u32| -> String {
        let from = start.saturating_sub(1) as usize;
        let to = (end as usize).min(lines.len());
        lines.get(from..to).unwrap_or_default().join("\n")
    };

    let mut candidates = Vec::with_capacity(total as usize);
    let mut index = 0u32;

    for function in &file.functions {
        candidates.push(ChunkCandidate {
            file_id: file.id.clone(),
            path: file.path.clone(),
            chunk_type: ChunkType::Function,
            chunk_name: function.name.clone(),
            chunk_text: prompts::describe_function(&file.path, function),
            code: slice(function.line_start, function.line_end),
            line_start: function.line_start,
            line_end: function.line_end,
            parent_class: function.parent_class.clone(),
            chunk_index: index,
            total_chunks: total,
        });
        index += 1;
    }

    for class in &file.classes {
        candidates.push(ChunkCandidate {
            file_id: file.id.clone(),
            path: file.path.clone(),
            chunk_type: ChunkType::Class,
            chunk_name: class.name.clone(),
            chunk_text: prompts::describe_class(&file.path, class),
            code: slice(class.line_start, class.line_end),
            line_start: class.line_start,
            line_end: class.line_end,
            parent_class: None,
            chunk_index: index,
            total_chunks: total,
        });
        index += 1;
    }

    candidates
}

/// Embed a text list in provider-sized groups with bounded concurrency,
/// preserving input order in the output.
async fn embed_grouped(
    ctx: &PipelineContext<'_>,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, AppError> {
    use common::utils::embedding::MAX_BATCH_INPUTS;

    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let groups: Vec<(usize, &[String])> = texts.chunks(MAX_BATCH_INPUTS).enumerate().collect();

    let mut results: Vec<(usize, Vec<Vec<f32>>)> = stream::iter(groups.into_iter().map(
        |(group_index, group)| async move {
            let vectors = ctx.services.embed_texts(group).await?;
            Ok::<_, AppError>((group_index, vectors))
        },
    ))
    .buffer_unordered(ctx.tuning.embed_concurrency.max(1))
    .collect::<Vec<Result<_, AppError>>>()
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    results.sort_by_key(|(group_index, _)| *group_index);

    Ok(results
        .into_iter()
        .flat_map(|(_, vectors)| vectors)
        .collect())
}
