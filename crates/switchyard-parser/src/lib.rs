//! Task-file parser (spec.md §4.A).
//!
//! A single-pass line scanner over the task file's narrow, line-oriented
//! grammar: task headings, indented `Key: value` metadata, `## Header`
//! sections, and the crucial-dependencies table. No general markdown
//! parser is pulled in — the grammar is deliberately small and the
//! teacher's own preference throughout this codebase is a hand-rolled
//! scanner over a full CommonMark dependency.

mod error;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use regex::Regex;
use sha2::{Digest, Sha256};

use switchyard_types::{AgentTag, DodSpec, Task, TaskPlan, TaskPlanMeta};

pub use error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Context,
    CrucialDependencies,
    QuestionsBlockers,
    Tasks,
    CompletionCriteria,
    Other,
}

fn classify_section(header: &str) -> Section {
    let lower = header.trim().to_ascii_lowercase();
    if lower.contains("crucial") && lower.contains("dependenc") {
        Section::CrucialDependencies
    } else if lower.contains("question") || lower.contains("blocker") {
        Section::QuestionsBlockers
    } else if lower.contains("completion") {
        Section::CompletionCriteria
    } else if lower.contains("task") {
        Section::Tasks
    } else if lower.contains("context") {
        Section::Context
    } else {
        Section::Other
    }
}

/// Parses a task file at `path` on disk.
pub fn parse_task_file(path: impl AsRef<Path>) -> Result<TaskPlan, ParseError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_source(&source, &path.display().to_string())
}

/// Parses task-file `source` already read into memory, recording
/// `source_path` into the resulting plan's metadata.
pub fn parse_source(source: &str, source_path: &str) -> Result<TaskPlan, ParseError> {
    let checksum = format!("{:x}", Sha256::digest(source.as_bytes()));

    let headings = HeadingRegexes::new();
    let section_re = Regex::new(r"^\s*##\s+(.+?)\s*$").expect("static regex");
    let checkbox_attempt_re = Regex::new(r"^\s*-\s*\[.?\]").expect("static regex");

    let mut current_section = Section::Other;
    let mut table_header_seen = false;

    let mut tasks: Vec<Task> = Vec::new();
    let mut seen_ids: HashMap<String, usize> = HashMap::new();
    let mut sanity_script_paths: HashSet<String> = HashSet::new();
    let mut declared_test_paths: HashSet<String> = HashSet::new();
    let mut questions_blockers_raw: Vec<String> = Vec::new();

    let mut current: Option<InProgressTask> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end();

        if let Some(caps) = section_re.captures(line) {
            finalize_task(
                &mut current,
                &mut tasks,
                &mut seen_ids,
                &mut sanity_script_paths,
                &mut declared_test_paths,
            )?;
            current_section = classify_section(&caps[1]);
            table_header_seen = false;
            continue;
        }

        match current_section {
            Section::Tasks => {
                if let Some((ordinal, title)) = headings.try_match(line) {
                    finalize_task(
                        &mut current,
                        &mut tasks,
                        &mut seen_ids,
                        &mut sanity_script_paths,
                        &mut declared_test_paths,
                    )?;
                    current = Some(InProgressTask::new(ordinal, title.trim().to_string(), line_no));
                    continue;
                }
                if checkbox_attempt_re.is_match(line) {
                    return Err(ParseError::InvalidTaskHeading {
                        line: line_no,
                        text: line.trim().to_string(),
                    });
                }
                if let Some(task) = current.as_mut() {
                    task.ingest_line(line);
                }
            }
            Section::CrucialDependencies => {
                if line.contains('|') {
                    if is_table_separator(line) {
                        continue;
                    }
                    let cells: Vec<String> = line
                        .trim()
                        .trim_matches('|')
                        .split('|')
                        .map(|c| c.trim().to_string())
                        .collect();
                    if !table_header_seen {
                        table_header_seen = true;
                        continue;
                    }
                    if let Some(path) = cells.get(2) {
                        if is_declared_path(path) {
                            sanity_script_paths.insert(path.clone());
                        }
                    }
                } else if !line.trim().is_empty() {
                    table_header_seen = false;
                }
            }
            Section::QuestionsBlockers => {
                let trimmed = line.trim();
                if trimmed.starts_with('-') {
                    questions_blockers_raw.push(trimmed.to_string());
                }
            }
            Section::Context | Section::CompletionCriteria | Section::Other => {}
        }
    }
    finalize_task(
        &mut current,
        &mut tasks,
        &mut seen_ids,
        &mut sanity_script_paths,
        &mut declared_test_paths,
    )?;

    let plan = TaskPlan {
        tasks,
        meta: TaskPlanMeta {
            source_path: source_path.to_string(),
            source_checksum: checksum,
            questions_blockers_raw,
            sanity_script_paths: sanity_script_paths.into_iter().collect(),
            declared_test_paths: declared_test_paths.into_iter().collect(),
        },
    };

    check_dependencies(&plan)?;
    check_group_order(&plan)?;
    check_cycles(&plan)?;

    Ok(plan)
}

fn is_table_separator(line: &str) -> bool {
    let trimmed = line.trim().trim_matches('|');
    !trimmed.is_empty()
        && trimmed
            .split('|')
            .all(|cell| !cell.trim().is_empty() && cell.trim().chars().all(|c| c == '-' || c == ':'))
}

fn is_declared_path(path: &str) -> bool {
    let lower = path.trim().to_ascii_lowercase();
    !lower.is_empty() && !matches!(lower.as_str(), "-" | "n/a" | "none" | "na")
}

struct HeadingRegexes {
    bold: Regex,
    plain: Regex,
    numbered: Regex,
}

impl HeadingRegexes {
    fn new() -> Self {
        Self {
            bold: Regex::new(r"(?i)^-\s*\[\s?\]\s*\*\*task\s+(\d+)\*\*\s*:\s*(.+)$")
                .expect("static regex"),
            plain: Regex::new(r"(?i)^-\s*\[\s?\]\s*task\s+(\d+)\s*:\s*(.+)$")
                .expect("static regex"),
            numbered: Regex::new(r"^-\s*\[\s?\]\s*(\d+)\.\s*(.+)$").expect("static regex"),
        }
    }

    fn try_match(&self, line: &str) -> Option<(u32, String)> {
        for re in [&self.bold, &self.plain, &self.numbered] {
            if let Some(caps) = re.captures(line) {
                let ordinal: u32 = caps[1].parse().ok()?;
                return Some((ordinal, caps[2].to_string()));
            }
        }
        None
    }
}

/// Metadata keys recognised on an indented line under a task heading.
/// `test` / `assertion` are only honoured inside a `Definition of Done`
/// block; see [`InProgressTask::ingest_line`].
const TOP_LEVEL_KEYS: &[&str] = &[
    "agent",
    "parallel",
    "dependencies",
    "notes",
    "sanity",
    "definition of done",
];

fn parse_key_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim_start();
    let trimmed = trimmed.strip_prefix('-').unwrap_or(trimmed).trim_start();
    let (key, rest) = trimmed.split_once(':')?;
    let key_norm = key.trim().to_ascii_lowercase();
    if TOP_LEVEL_KEYS.contains(&key_norm.as_str()) || key_norm == "test" || key_norm == "assertion"
    {
        Some((key_norm, rest.trim().to_string()))
    } else {
        None
    }
}

struct InProgressTask {
    heading_line: usize,
    ordinal: u32,
    title: String,
    body_lines: Vec<String>,
    agent: AgentTag,
    group: u32,
    dependencies: Vec<String>,
    sanity_paths: Vec<String>,
    in_dod: bool,
    dod_test: Option<String>,
    dod_assertion: Option<String>,
}

impl InProgressTask {
    fn new(ordinal: u32, title: String, heading_line: usize) -> Self {
        Self {
            heading_line,
            ordinal,
            title,
            body_lines: Vec::new(),
            agent: AgentTag::General,
            group: 0,
            dependencies: Vec::new(),
            sanity_paths: Vec::new(),
            in_dod: false,
            dod_test: None,
            dod_assertion: None,
        }
    }

    fn ingest_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let Some((key, value)) = parse_key_line(line) else {
            self.body_lines.push(line.trim().to_string());
            return;
        };
        match key.as_str() {
            "agent" => {
                self.agent = AgentTag::parse(&value);
                self.in_dod = false;
            }
            "parallel" => {
                self.group = value.trim().parse().unwrap_or(0);
                self.in_dod = false;
            }
            "dependencies" => {
                self.dependencies = parse_dependencies(&value);
                self.in_dod = false;
            }
            "notes" => {
                if !value.is_empty() {
                    self.body_lines.push(value);
                }
                self.in_dod = false;
            }
            "sanity" => {
                self.in_dod = false;
                if is_declared_path(&value) {
                    self.sanity_paths.push(value);
                }
            }
            "definition of done" => {
                self.in_dod = true;
            }
            "test" if self.in_dod => {
                self.dod_test = Some(value);
            }
            "assertion" if self.in_dod => {
                self.dod_assertion = Some(value);
            }
            // `Test:`/`Assertion:` seen outside a DoD block are just prose.
            _ => self.body_lines.push(line.trim().to_string()),
        }
    }
}

fn parse_dependencies(raw: &str) -> Vec<String> {
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() || matches!(lower.as_str(), "none" | "n/a" | "na" | "-") {
        return Vec::new();
    }
    raw.split(|c: char| c == ',' || c == ';')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(normalize_task_ref)
        .collect()
}

fn normalize_task_ref(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("task") {
        rest.trim().trim_start_matches('#').trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn finalize_task(
    current: &mut Option<InProgressTask>,
    tasks: &mut Vec<Task>,
    seen_ids: &mut HashMap<String, usize>,
    sanity_script_paths: &mut HashSet<String>,
    declared_test_paths: &mut HashSet<String>,
) -> Result<(), ParseError> {
    let Some(in_progress) = current.take() else {
        return Ok(());
    };

    let id = in_progress.ordinal.to_string();
    if seen_ids.contains_key(&id) {
        return Err(ParseError::DuplicateTaskId {
            line: in_progress.heading_line,
            id,
        });
    }
    seen_ids.insert(id.clone(), in_progress.heading_line);

    for path in &in_progress.sanity_paths {
        sanity_script_paths.insert(path.clone());
    }

    let dod = in_progress.dod_test.as_ref().map(|test| {
        declared_test_paths.insert(split_test_id(test).0.to_string());
        DodSpec {
            test: test.clone(),
            assertion: in_progress.dod_assertion.clone(),
        }
    });

    let mut body = in_progress.title.clone();
    if !in_progress.body_lines.is_empty() {
        body.push_str("\n\n");
        body.push_str(&in_progress.body_lines.join("\n"));
    }

    tasks.push(Task {
        id,
        ordinal: tasks.len() as u32 + 1,
        title: in_progress.title,
        body,
        agent: in_progress.agent,
        group: in_progress.group,
        dependencies: in_progress.dependencies,
        dod,
        timeout: Task::DEFAULT_TIMEOUT,
        max_retries: Task::DEFAULT_MAX_RETRIES,
    });

    Ok(())
}

fn split_test_id(test: &str) -> (&str, Option<&str>) {
    match test.split_once("::") {
        Some((file, name)) => (file, Some(name)),
        None => (test, None),
    }
}

fn check_dependencies(plan: &TaskPlan) -> Result<(), ParseError> {
    for task in &plan.tasks {
        for dep_id in &task.dependencies {
            if plan.task(dep_id).is_none() {
                return Err(ParseError::UnknownDependency {
                    task_id: task.id.clone(),
                    dep_id: dep_id.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_group_order(plan: &TaskPlan) -> Result<(), ParseError> {
    for task in &plan.tasks {
        for dep_id in &task.dependencies {
            let dep = plan.task(dep_id).expect("validated by check_dependencies");
            let ok = dep.group < task.group
                || (dep.group == task.group && dep.ordinal < task.ordinal);
            if !ok {
                return Err(ParseError::GroupOrderViolation {
                    task_id: task.id.clone(),
                    dep_id: dep_id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Safety net per spec.md §4.A: construction rules make a cycle
/// impossible, but the scanner still checks.
fn check_cycles(plan: &TaskPlan) -> Result<(), ParseError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        plan: &'a TaskPlan,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), ParseError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                stack.push(id);
                return Err(ParseError::DependencyCycle(stack.join(" -> ")));
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(task) = plan.task(id) {
            for dep in &task.dependencies {
                visit(plan, dep, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for task in &plan.tasks {
        let mut stack = Vec::new();
        visit(plan, &task.id, &mut marks, &mut stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: &str = r#"
## Tasks
- [ ] **Task 1**: Setup database
  - Agent: general-purpose
  - Parallel: 0
  - Dependencies: none
  - Definition of Done:
    - Test: tests/test_setup.py::test_schema_created
    - Assertion: tables x, y, z exist

## Questions/Blockers
None
"#;

    #[test]
    fn parses_minimal_happy_path() {
        let plan = parse_source(HAPPY_PATH, "task.md").expect("parses");
        assert_eq!(plan.tasks.len(), 1);
        let task = &plan.tasks[0];
        assert_eq!(task.id, "1");
        assert_eq!(task.group, 0);
        assert!(task.dependencies.is_empty());
        assert_eq!(task.agent, AgentTag::General);
        let dod = task.dod.as_ref().expect("dod present");
        assert_eq!(dod.test, "tests/test_setup.py::test_schema_created");
        assert_eq!(dod.split_test_id().0, "tests/test_setup.py");
        assert!(plan
            .meta
            .declared_test_paths
            .contains(&"tests/test_setup.py".to_string()));
        assert!(plan.meta.questions_blockers_raw.is_empty());
    }

    #[test]
    fn parallel_group_and_dependencies() {
        let source = r#"
## Tasks
- [ ] **Task 1**: Build base image
  - Agent: general-purpose
  - Parallel: 0
  - Dependencies: none

- [ ] **Task 2**: Run migration
  - Agent: general-purpose
  - Parallel: 1
  - Dependencies: Task 1

- [ ] **Task 3**: Run seed script
  - Agent: general-purpose
  - Parallel: 1
  - Dependencies: 1
"#;
        let plan = parse_source(source, "task.md").expect("parses");
        assert_eq!(plan.max_group(), 1);
        let t2 = plan.task("2").unwrap();
        assert_eq!(t2.dependencies, vec!["1".to_string()]);
        let t3 = plan.task("3").unwrap();
        assert_eq!(t3.dependencies, vec!["1".to_string()]);
    }

    #[test]
    fn rejects_unknown_dependency() {
        let source = r#"
## Tasks
- [ ] **Task 1**: Only task
  - Agent: general-purpose
  - Parallel: 0
  - Dependencies: 9
"#;
        let err = parse_source(source, "task.md").unwrap_err();
        assert!(matches!(err, ParseError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_duplicate_task_id() {
        let source = r#"
## Tasks
- [ ] Task 1: First
  - Parallel: 0
- [ ] Task 1: Second
  - Parallel: 0
"#;
        let err = parse_source(source, "task.md").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateTaskId { .. }));
    }

    #[test]
    fn rejects_malformed_task_heading() {
        let source = r#"
## Tasks
- [ ] this is not a valid heading at all
"#;
        let err = parse_source(source, "task.md").unwrap_err();
        assert!(matches!(err, ParseError::InvalidTaskHeading { .. }));
    }

    #[test]
    fn rejects_group_order_violation() {
        let source = r#"
## Tasks
- [ ] Task 1: Earlier, but in a later group
  - Parallel: 2
  - Dependencies: none
- [ ] Task 2: Depends on a same-group task declared after it
  - Parallel: 2
  - Dependencies: 3
- [ ] Task 3: Declared after Task 2, same group
  - Parallel: 2
  - Dependencies: none
"#;
        let err = parse_source(source, "task.md").unwrap_err();
        assert!(matches!(err, ParseError::GroupOrderViolation { .. }));
    }

    #[test]
    fn records_questions_blockers_section_verbatim() {
        let source = r#"
## Tasks
- [ ] Task 1: Only task
  - Parallel: 0

## Questions/Blockers
- Which database should we use?
- None
"#;
        let plan = parse_source(source, "task.md").expect("parses");
        assert_eq!(plan.meta.questions_blockers_raw.len(), 2);
        assert!(plan.meta.questions_blockers_raw[0].contains("Which database"));
    }

    #[test]
    fn crucial_dependencies_table_feeds_sanity_paths() {
        let source = r#"
## Crucial Dependencies
| Library | API | Sanity Script | Status |
|---|---|---|---|
| requests | get | sanity/http_check.py | verified |

## Tasks
- [ ] Task 1: Only task
  - Parallel: 0
"#;
        let plan = parse_source(source, "task.md").expect("parses");
        assert!(plan
            .meta
            .sanity_script_paths
            .contains(&"sanity/http_check.py".to_string()));
    }

    #[test]
    fn per_task_sanity_line_also_feeds_declared_set() {
        let source = r#"
## Tasks
- [ ] Task 1: Only task
  - Parallel: 0
  - Sanity: sanity/custom_check.py
"#;
        let plan = parse_source(source, "task.md").expect("parses");
        assert!(plan
            .meta
            .sanity_script_paths
            .contains(&"sanity/custom_check.py".to_string()));
    }

    #[test]
    fn numbered_heading_form_is_recognised() {
        let source = r#"
## Tasks
- [ ] 1. Do the thing
  - Parallel: 0
"#;
        let plan = parse_source(source, "task.md").expect("parses");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].title, "Do the thing");
    }

    #[test]
    fn checksum_is_deterministic() {
        let a = parse_source(HAPPY_PATH, "a.md").unwrap();
        let b = parse_source(HAPPY_PATH, "b.md").unwrap();
        assert_eq!(a.meta.source_checksum, b.meta.source_checksum);
    }

    #[test]
    fn research_agent_is_exempt_from_dod() {
        let source = r#"
## Tasks
- [ ] Task 1: Survey the landscape
  - Agent: research
  - Parallel: 0
"#;
        let plan = parse_source(source, "task.md").expect("parses");
        assert!(plan.tasks[0].agent.exempt_from_dod());
        assert!(!plan.tasks[0].requires_dod());
    }
}
