//! 回合级集成测试：记忆、工具回灌、步数上限、取消

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use libris::agent::{GENERIC_FAILURE, LibraryAgent, TurnStatus};
use libris::catalog::{
    BookDraft, CatalogStore, CopyStatus, EmbeddingSync, InMemoryCatalog, RequestStatus,
};
use libris::core::SessionContext;
use libris::llm::{Completion, HashEmbedder, LlmError, MockLlmClient};
use libris::memory::{InMemoryMemoryStore, MemoryManager, MemoryStore, Message, Role, ToolCall};
use libris::react::{Planner, TurnEngine, DEFAULT_INSTRUCTIONS};
use libris::retrieval::{DistanceMetric, Retriever};
use libris::tools::{
    AcquisitionRequestTool, FilteredSearchTool, PlainTextExtractor, StatusLookupTool,
    StudyPlanLimits, StudyPlanTool, StudyPlanner, ToolExecutor, ToolRegistry, TopicSearchTool,
};

const SUMMARY_MARKER: &str = "You are a conversation summarization agent";

struct Harness {
    agent: LibraryAgent,
    catalog: Arc<InMemoryCatalog>,
    memory: Arc<InMemoryMemoryStore>,
    llm: Arc<MockLlmClient>,
    sync: EmbeddingSync,
}

fn harness(llm: MockLlmClient, threshold: usize, max_iterations: usize) -> Harness {
    let llm = Arc::new(llm);
    let catalog = Arc::new(InMemoryCatalog::new());
    let embedder = Arc::new(HashEmbedder::default());
    let retriever = Arc::new(Retriever::new(
        embedder.clone(),
        catalog.clone(),
        DistanceMetric::Cosine,
        5,
    ));
    let study_planner = Arc::new(StudyPlanner::new(
        llm.clone(),
        retriever.clone(),
        Arc::new(PlainTextExtractor),
        StudyPlanLimits::default(),
    ));

    let mut registry = ToolRegistry::new();
    registry.register(StatusLookupTool::new(catalog.clone()));
    registry.register(FilteredSearchTool::new(catalog.clone(), 10));
    registry.register(TopicSearchTool::new(retriever, 5));
    registry.register(AcquisitionRequestTool::new(catalog.clone()));
    registry.register(StudyPlanTool::new(study_planner));

    let planner = Planner::new(llm.clone(), DEFAULT_INSTRUCTIONS, &registry);
    let engine = TurnEngine::new(planner, ToolExecutor::new(registry, 5))
        .with_max_iterations(max_iterations);
    let memory = Arc::new(InMemoryMemoryStore::new());
    let manager = MemoryManager::new(memory.clone(), llm.clone(), threshold);

    Harness {
        agent: LibraryAgent::new(engine, manager),
        sync: EmbeddingSync::new(catalog.clone(), embedder, 5),
        catalog,
        memory,
        llm,
    }
}

/// 放入 Cosmos（两本副本）与 The Right Stuff，并建立向量记录
async fn seed(h: &Harness) {
    let sagan = h.catalog.add_author("Carl Sagan").await.unwrap();
    let wolfe = h.catalog.add_author("Tom Wolfe").await.unwrap();
    let science = h.catalog.add_genre("Science").await.unwrap();
    let cosmos = h
        .catalog
        .add_book(BookDraft {
            title: "Cosmos".into(),
            author_id: sagan.id,
            genre_id: science.id.clone(),
            summary: "A journey through the universe and space exploration".into(),
        })
        .await
        .unwrap();
    let stuff = h
        .catalog
        .add_book(BookDraft {
            title: "The Right Stuff".into(),
            author_id: wolfe.id,
            genre_id: science.id,
            summary: "Test pilots and the first astronauts".into(),
        })
        .await
        .unwrap();
    h.catalog
        .add_instance(&cosmos.id, "Random House 1980", CopyStatus::Available, None)
        .await
        .unwrap();
    h.catalog
        .add_instance(&cosmos.id, "Ballantine 1985", CopyStatus::Loaned, Some("2026-11-01"))
        .await
        .unwrap();
    h.sync.sync_book(&cosmos.id).await.unwrap();
    h.sync.sync_book(&stuff.id).await.unwrap();
}

fn is_summary_request(messages: &[Message]) -> bool {
    messages
        .first()
        .map(|m| m.content.starts_with(SUMMARY_MARKER))
        .unwrap_or(false)
}

#[tokio::test]
async fn test_missing_book_then_affirmative_request() {
    let llm = MockLlmClient::scripted(vec![
        Ok(Completion::text(r#"{"tool": "filtered_search", "args": {"title": "Dune"}}"#)),
        Ok(Completion::text(
            "I'm sorry, Dune is not in our collection. Would you like me to request it for the library?",
        )),
        Ok(Completion::text(
            r#"{"tool": "acquisition_request", "args": {"title": "Dune", "author": "Frank Herbert", "user_id": "someone-else"}}"#,
        )),
        Ok(Completion::text("Done! I've requested Dune for the library.")),
    ]);
    let h = harness(llm, 10, 8);
    seed(&h).await;
    let session = SessionContext::new("sess-dune", "user-42");

    let first = h.agent.submit_turn(&session, "Do you have Dune?").await;
    assert_eq!(first.status, TurnStatus::Answered);
    assert!(first.answer.contains("Would you like me to request it"));
    // 第一回合只询问，不写入请求
    assert!(h.catalog.list_requests().await.unwrap().is_empty());
    let prompts = h.llm.prompts();
    assert!(prompts[1][0]
        .content
        .contains("No books were found matching the specified criteria."));

    let second = h.agent.submit_turn(&session, "Yes, please").await;
    assert_eq!(second.status, TurnStatus::Answered);
    let requests = h.catalog.list_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].title, "Dune");
    assert_eq!(requests[0].requested_by, "user-42");
    assert_eq!(requests[0].status, RequestStatus::Pending);
    assert!(h.llm.last_prompt_text().contains("has been recorded (status: pending)"));

    // 只保存 user 消息与最终回复，回合内的工具往返不落盘
    let log = h.memory.load_messages("sess-dune").await.unwrap();
    assert_eq!(log.len(), 4);
    assert!(log.iter().all(|m| m.role != Role::Tool && m.tool_calls.is_empty()));
    assert_eq!(log[2], Message::user("Yes, please"));
}

#[tokio::test]
async fn test_compaction_runs_after_threshold_turn() {
    let llm = MockLlmClient::new().with_responder(|msgs| {
        if is_summary_request(msgs) {
            Ok(Completion::text("The user greeted the assistant twice."))
        } else {
            Ok(Completion::text("Hello!"))
        }
    });
    let h = harness(llm, 4, 8);
    let session = SessionContext::new("sess-c", "u");

    h.agent.submit_turn(&session, "Hi").await;
    assert_eq!(h.memory.load_messages("sess-c").await.unwrap().len(), 2);
    assert_eq!(h.memory.load_summary("sess-c").await.unwrap(), "");

    let reply = h.agent.submit_turn(&session, "Hi again").await;
    assert_eq!(reply.answer, "Hello!");
    assert!(h.memory.load_messages("sess-c").await.unwrap().is_empty());
    assert_eq!(
        h.memory.load_summary("sess-c").await.unwrap(),
        "The user greeted the assistant twice."
    );

    h.agent.submit_turn(&session, "What did I say?").await;
    let prompt = h.llm.last_prompt_text();
    assert!(prompt.contains(
        "**Conversation Summary (Long-Term Memory):**\nThe user greeted the assistant twice."
    ));
    assert!(!prompt.contains("User: Hi again"));
}

#[tokio::test]
async fn test_short_term_log_stays_bounded() {
    let llm = MockLlmClient::new().with_responder(|msgs| {
        if is_summary_request(msgs) {
            Ok(Completion::text("Summary so far."))
        } else {
            Ok(Completion::text("Sure."))
        }
    });
    let threshold = 3;
    let h = harness(llm, threshold, 8);
    let session = SessionContext::new("sess-b", "u");

    for i in 0..7 {
        let before = h.memory.load_messages("sess-b").await.unwrap().len();
        assert!(before <= threshold + 1, "turn {i} started with {before} messages");
        let reply = h.agent.submit_turn(&session, &format!("question {i}")).await;
        assert_eq!(reply.status, TurnStatus::Answered);
    }
    assert_eq!(h.memory.load_summary("sess-b").await.unwrap(), "Summary so far.");
}

#[tokio::test]
async fn test_failed_compaction_keeps_log_and_retries() {
    let summarizer_up = Arc::new(AtomicBool::new(false));
    let flag = summarizer_up.clone();
    let llm = MockLlmClient::new().with_responder(move |msgs| {
        if is_summary_request(msgs) {
            if flag.load(Ordering::SeqCst) {
                Ok(Completion::text("Recovered summary."))
            } else {
                Err(LlmError::ApiError("summarizer down".into()))
            }
        } else {
            Ok(Completion::text("Answer."))
        }
    });
    let h = harness(llm, 4, 8);
    let session = SessionContext::new("sess-f", "u");

    h.agent.submit_turn(&session, "one").await;
    let reply = h.agent.submit_turn(&session, "two").await;
    // 压缩失败不影响回复
    assert_eq!(reply.status, TurnStatus::Answered);
    assert_eq!(reply.answer, "Answer.");
    assert_eq!(h.memory.load_messages("sess-f").await.unwrap().len(), 4);
    assert_eq!(h.memory.load_summary("sess-f").await.unwrap(), "");

    summarizer_up.store(true, Ordering::SeqCst);
    h.agent.submit_turn(&session, "three").await;
    assert!(h.memory.load_messages("sess-f").await.unwrap().is_empty());
    assert_eq!(h.memory.load_summary("sess-f").await.unwrap(), "Recovered summary.");
}

#[tokio::test]
async fn test_completion_failure_leaves_memory_untouched() {
    let llm = MockLlmClient::scripted(vec![
        Ok(Completion::text("Hello!")),
        Err(LlmError::ApiError("upstream 503".into())),
    ]);
    let h = harness(llm, 10, 8);
    let session = SessionContext::new("sess-e", "u");

    h.agent.submit_turn(&session, "Hi").await;
    let reply = h.agent.submit_turn(&session, "Any books on Mars?").await;
    assert_eq!(reply.status, TurnStatus::Failed);
    assert_eq!(reply.answer, GENERIC_FAILURE);
    assert!(!reply.answer.contains("503"));

    let log = h.memory.load_messages("sess-e").await.unwrap();
    assert_eq!(log, vec![Message::user("Hi"), Message::assistant("Hello!")]);
}

#[tokio::test]
async fn test_tool_failures_are_fed_back_to_reasoning() {
    let llm = MockLlmClient::scripted(vec![
        Ok(Completion::with_calls(vec![
            ToolCall::new("renew_loan", json!({"book": "Cosmos"})),
            ToolCall::new("topic_search", json!({"topic": "ai"})),
        ])),
        Ok(Completion::text("Could you tell me a bit more about the topic?")),
    ]);
    let h = harness(llm, 10, 8);
    let session = SessionContext::new("sess-t", "u");

    let reply = h.agent.submit_turn(&session, "Books on ai?").await;
    assert_eq!(reply.status, TurnStatus::Answered);
    assert_eq!(reply.answer, "Could you tell me a bit more about the topic?");
    let prompt = h.llm.last_prompt_text();
    assert!(prompt.contains("Tool Result (for renew_loan): Error: Unknown tool: renew_loan"));
    assert!(prompt.contains("Tool Result (for topic_search): Error: Invalid arguments for topic_search"));
}

#[tokio::test]
async fn test_parallel_tool_results_keep_request_order() {
    let llm = MockLlmClient::scripted(vec![
        Ok(Completion::text(
            r#"{"tool_calls": [
                {"tool": "topic_search", "args": {"topic": "space exploration"}},
                {"tool": "status_lookup", "args": {"identifier": "cosmos"}},
                {"tool": "filtered_search", "args": {"author": "wolfe"}}
            ]}"#,
        )),
        Ok(Completion::text("Here is what I found.")),
    ]);
    let h = harness(llm, 10, 8);
    seed(&h).await;
    let session = SessionContext::new("sess-p", "u");

    let reply = h.agent.submit_turn(&session, "Tell me about space books").await;
    assert_eq!(reply.status, TurnStatus::Answered);

    let prompt = h.llm.last_prompt_text();
    let topic = prompt.find("Tool Result (for topic_search)").unwrap();
    let status = prompt.find("Tool Result (for status_lookup)").unwrap();
    let filtered = prompt.find("Tool Result (for filtered_search)").unwrap();
    assert!(topic < status && status < filtered);
    assert!(prompt.contains("Book: \"Cosmos\""));
    assert!(prompt.contains("Status: Loaned, Due date: 2026-11-01"));
    assert!(prompt.contains("\"title\": \"The Right Stuff\""));
}

#[tokio::test]
async fn test_iteration_bound_fails_turn() {
    let llm = MockLlmClient::new().with_responder(|_| {
        Ok(Completion::with_calls(vec![ToolCall::new(
            "filtered_search",
            json!({"genre": "science"}),
        )]))
    });
    let h = harness(llm, 10, 3);
    let session = SessionContext::new("sess-m", "u");

    let reply = h.agent.submit_turn(&session, "Keep searching").await;
    assert_eq!(reply.status, TurnStatus::Failed);
    assert_eq!(reply.answer, GENERIC_FAILURE);
    assert_eq!(h.llm.call_count(), 3);
    assert!(h.memory.load_messages("sess-m").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_turn_persists_nothing() {
    let llm = MockLlmClient::new().with_delay(Duration::from_millis(500));
    let h = harness(llm, 10, 8);
    let session = SessionContext::new("sess-x", "u");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let reply = h
        .agent
        .submit_turn_with_cancel(&session, "Slow question", &token, None)
        .await;
    assert_eq!(reply.status, TurnStatus::Cancelled);
    assert_eq!(reply.answer, GENERIC_FAILURE);
    assert!(h.memory.load_messages("sess-x").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_turns_of_one_session_are_serialized() {
    let llm = MockLlmClient::new()
        .with_delay(Duration::from_millis(30))
        .with_responder(|_| Ok(Completion::text("ok")));
    let h = harness(llm, 10, 8);
    let session = SessionContext::new("sess-s", "u");

    let (a, b) = tokio::join!(
        h.agent.submit_turn(&session, "first"),
        h.agent.submit_turn(&session, "second")
    );
    assert_eq!(a.status, TurnStatus::Answered);
    assert_eq!(b.status, TurnStatus::Answered);

    let roles: Vec<Role> = h
        .memory
        .load_messages("sess-s")
        .await
        .unwrap()
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_empty_tool_envelope_is_never_shown_to_user() {
    let llm = MockLlmClient::scripted(vec![
        Ok(Completion::text(r#"{"tool_calls": []}"#)),
        Ok(Completion::text("Hello! How can I help with the catalog?")),
    ]);
    let h = harness(llm, 10, 8);
    let session = SessionContext::new("sess-e", "u");

    let reply = h.agent.submit_turn(&session, "hi").await;
    assert_eq!(reply.status, TurnStatus::Answered);
    assert_eq!(reply.answer, "Hello! How can I help with the catalog?");
    assert!(h.llm.last_prompt_text().contains("**Format Correction:**"));
    let log = h.memory.load_messages("sess-e").await.unwrap();
    assert!(log.iter().all(|m| !m.content.contains("tool_calls")));
}
