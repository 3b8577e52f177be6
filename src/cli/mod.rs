//! CLI 모듈
//!
//! notebook-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::batch::collector::{collect_uploads, CollectorConfig};
use crate::config::{Backend, RagConfig};
use crate::error::RagError;
use crate::rag::CancelScope;
use crate::service::{open_store, NotebookRag};
use crate::session::SessionState;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "notebook-rag")]
#[command(version, about = "Jupyter 노트북 RAG 질의응답", long_about = None)]
pub struct Cli {
    /// 인덱스 이름 (NOTEBOOK_RAG_INDEX 대신)
    #[arg(long, global = true)]
    pub index: Option<String>,

    /// 벡터 백엔드: pinecone | lance (NOTEBOOK_RAG_BACKEND 대신)
    #[arg(long, global = true)]
    pub backend: Option<Backend>,

    /// 검색 후보 수 (NOTEBOOK_RAG_TOP_K 대신)
    #[arg(short = 'k', long = "top-k", global = true)]
    pub top_k: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 노트북(.ipynb) 또는 zip 아카이브를 새 네임스페이스에 수집
    Ingest {
        /// 파일 또는 폴더 경로
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// 숨김 파일 포함
        #[arg(long)]
        include_hidden: bool,

        /// .gitignore 무시
        #[arg(long)]
        no_gitignore: bool,
    },

    /// 네임스페이스에 질문
    Query {
        /// 질문
        question: String,

        /// 대상 네임스페이스 (기본: 마지막으로 수집한 네임스페이스)
        #[arg(short, long)]
        namespace: Option<String>,

        /// 이전 대화 내용 (대화형 프롬프트 사용)
        #[arg(long)]
        history: Option<String>,
    },

    /// 네임스페이스 삭제 (되돌릴 수 없음)
    Delete {
        /// 삭제할 네임스페이스 ID
        namespace: String,
    },

    /// 인덱스 관리
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// 상태 확인
    Status,
}

#[derive(Subcommand)]
pub enum IndexAction {
    /// 인덱스 존재 여부 확인
    Check,
    /// 인덱스 생성
    Create,
    /// 인덱스 삭제 (모든 네임스페이스 포함)
    Delete {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env().map_err(user_error)?;
    if let Some(index) = cli.index {
        config.index_name = index;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }
    config.validate().map_err(user_error)?;

    let shutdown = shutdown_on_ctrl_c();

    match cli.command {
        Commands::Ingest {
            paths,
            include_hidden,
            no_gitignore,
        } => cmd_ingest(&config, &paths, include_hidden, !no_gitignore, &shutdown).await,
        Commands::Query {
            question,
            namespace,
            history,
        } => cmd_query(&config, &question, namespace, history, &shutdown).await,
        Commands::Delete { namespace } => cmd_delete(&config, &namespace).await,
        Commands::Index { action } => cmd_index(&config, action).await,
        Commands::Status => cmd_status(&config).await,
    }
}

/// Ctrl-C 시 취소되는 루트 토큰
fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[!] 취소 중...");
            token.cancel();
        }
    });
    shutdown
}

/// RagError → 사용자 메시지
fn user_error(error: RagError) -> anyhow::Error {
    tracing::debug!("{} detail: {:?}", error.kind(), error);
    anyhow::anyhow!(error.user_message())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
///
/// 모든 파일을 하나의 배치로 묶어 새 네임스페이스에 넣고,
/// 그 네임스페이스를 이후 질의의 기본 대상으로 기록합니다.
async fn cmd_ingest(
    config: &RagConfig,
    paths: &[PathBuf],
    include_hidden: bool,
    respect_gitignore: bool,
    shutdown: &CancellationToken,
) -> Result<()> {
    let collector_config = CollectorConfig {
        include_hidden,
        respect_gitignore,
        ..Default::default()
    };

    let uploads = collect_uploads(paths, &collector_config).context("업로드 파일 수집 실패")?;
    if uploads.is_empty() {
        bail!("수집할 .ipynb 또는 .zip 파일이 없습니다");
    }

    let total_bytes: usize = uploads.iter().map(|u| u.bytes.len()).sum();
    println!(
        "[*] 수집 중: {} 파일 ({})",
        uploads.len(),
        format_bytes(total_bytes)
    );

    let rag = NotebookRag::from_config(config).await.map_err(user_error)?;
    let report = rag
        .ingest(&uploads, &shutdown.child_token())
        .await
        .map_err(user_error)?;

    println!("\n[OK] 수집 완료");
    println!("     네임스페이스: {}", report.namespace_id);
    println!("     청크: {} 개", report.chunk_count);
    for source in &report.sources {
        println!("     - {}", truncate_text(source, 80));
    }

    let session_path = config.session_path();
    let mut session = SessionState::load(&session_path).unwrap_or_else(|e| {
        tracing::warn!("세션 파일을 읽지 못해 새로 만듭니다: {:#}", e);
        SessionState::default()
    });
    session.set_current(&report.namespace_id);
    session.save(&session_path).context("세션 저장 실패")?;

    Ok(())
}

/// 질의 명령어 (query)
async fn cmd_query(
    config: &RagConfig,
    question: &str,
    namespace: Option<String>,
    history: Option<String>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let namespace = match namespace {
        Some(ns) => ns,
        None => SessionState::load(&config.session_path())
            .context("세션 파일 읽기 실패")?
            .current_namespace
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "대상 네임스페이스가 없습니다. 먼저 ingest 하거나 --namespace를 지정하세요"
                )
            })?,
    };

    println!("[*] 질문 중 ({}): \"{}\"", namespace, question);

    let rag = NotebookRag::from_config(config).await.map_err(user_error)?;
    let scope = CancelScope::child_of(shutdown);
    let answer = match history {
        Some(history) => {
            rag.query_with_history(&namespace, question, &history, &scope)
                .await
        }
        None => rag.query(&namespace, question, &scope).await,
    }
    .map_err(user_error)?;

    println!("\n{}", answer);
    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: &RagConfig, namespace: &str) -> Result<()> {
    let store = open_store(config).await.map_err(user_error)?;
    let outcome = store
        .delete(&config.index_name, namespace)
        .await
        .map_err(user_error)?;

    if outcome.is_deleted() {
        println!("[OK] {}", outcome.message());

        let session_path = config.session_path();
        let mut session = SessionState::load(&session_path).unwrap_or_default();
        if session.forget(namespace) {
            session.save(&session_path).context("세션 저장 실패")?;
        }
    } else {
        println!("[!] {}", outcome.message());
    }

    Ok(())
}

/// 인덱스 관리 명령어 (index)
async fn cmd_index(config: &RagConfig, action: IndexAction) -> Result<()> {
    let store = open_store(config).await.map_err(user_error)?;
    let index = &config.index_name;

    match action {
        IndexAction::Check => {
            if store.check_index(index).await.map_err(user_error)? {
                println!("[OK] 인덱스 '{}' 존재함", index);
            } else {
                println!("[!] 인덱스 '{}' 없음", index);
            }
        }
        IndexAction::Create => {
            if store.check_index(index).await.map_err(user_error)? {
                println!("[!] 인덱스 '{}'가 이미 있습니다", index);
                return Ok(());
            }
            store
                .create_index(index, config.embedding_dimension)
                .await
                .map_err(user_error)?;
            println!(
                "[OK] 인덱스 '{}' 생성됨 (차원 {})",
                index, config.embedding_dimension
            );
        }
        IndexAction::Delete { yes } => {
            if !yes {
                bail!("인덱스 삭제는 모든 네임스페이스를 지웁니다. 계속하려면 --yes를 지정하세요");
            }
            if store.delete_index(index).await.map_err(user_error)? {
                println!("[OK] 인덱스 '{}' 삭제됨", index);
            } else {
                println!("[!] 인덱스 '{}' 없음", index);
            }
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("notebook-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 백엔드: {}", config.backend);
    println!("[*] 인덱스: {}", config.index_name);

    if config.openai_api_key.is_some() {
        println!("[OK] OpenAI API 키: 설정됨");
    } else {
        println!("[!] OpenAI API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    if config.backend == Backend::Pinecone {
        if config.pinecone_api_key.is_some() {
            println!("[OK] Pinecone API 키: 설정됨");
        } else {
            println!("[!] Pinecone API 키: 미설정");
            println!("    설정: export PINECONE_API_KEY=your-key");
        }
    }

    match SessionState::load(&config.session_path()) {
        Ok(session) => match session.current_namespace {
            Some(ns) => println!("[OK] 현재 네임스페이스: {}", ns),
            None => println!("[*] 현재 네임스페이스: 없음"),
        },
        Err(e) => println!("[!] 세션 파일 읽기 실패: {:#}", e),
    }

    match open_store(config).await {
        Ok(store) => match store.check_index(&config.index_name).await {
            Ok(true) => println!("[OK] 인덱스 '{}' 존재함", config.index_name),
            Ok(false) => println!("[!] 인덱스 '{}' 없음", config.index_name),
            Err(e) => tracing::debug!("인덱스 확인 실패: {:?}", e),
        },
        Err(e) => tracing::debug!("저장소 열기 실패: {:?}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
