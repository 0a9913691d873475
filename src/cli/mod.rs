//! TR-017: CLI subcommands: init, validate, plan, apply, destroy, status, history, unlock.

use crate::adapter::local::LocalCloud;
use crate::core::builder::build_stack;
use crate::core::cancel::CancelSignal;
use crate::core::executor::{self, ApplyConfig};
use crate::core::parser::{self, ProjectConfig};
use crate::core::state::{self, FileStateStore, StateStore};
use crate::core::types::{
    ChangeAction, ChangePlan, Environment, ExecutionResult, Policy, ProvenanceEvent,
};
use crate::core::planner;
use crate::stacks;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit code for `plan` when changes are pending.
pub const EXIT_CHANGES_PENDING: i32 = 2;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a project with the notisce stacks
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate terrace.yaml without touching any state
    Validate {
        /// Path to terrace.yaml
        #[arg(short, long, default_value = "terrace.yaml")]
        file: PathBuf,
    },

    /// Show the change plan for a stack (exit 2 when changes are pending)
    Plan {
        /// Stack name
        stack: String,

        /// Path to terrace.yaml
        #[arg(short, long, default_value = "terrace.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Converge a stack to its declared state
    Apply {
        /// Stack name
        stack: String,

        /// Path to terrace.yaml
        #[arg(short, long, default_value = "terrace.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Stop starting new ops after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete every resource recorded for a stack
    Destroy {
        /// Stack name
        stack: String,

        /// Path to terrace.yaml (env and policy only; optional)
        #[arg(short, long, default_value = "terrace.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Stop starting new ops after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show recorded state
    Status {
        /// Only this stack
        stack: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show the provenance event log of a stack
    History {
        /// Stack name
        stack: String,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Remove the apply lease left behind by a crashed run
    Unlock {
        /// Stack name
        stack: String,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
}

/// Dispatch a CLI command. Returns the process exit code.
pub fn dispatch(cmd: Commands) -> Result<i32, String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path).map(|()| 0),
        Commands::Validate { file } => cmd_validate(&file).map(|()| 0),
        Commands::Plan {
            stack,
            file,
            state_dir,
            json,
        } => cmd_plan(&file, &state_dir, &stack, json),
        Commands::Apply {
            stack,
            file,
            state_dir,
            timeout,
        } => cmd_apply(&file, &state_dir, &stack, timeout).map(|()| 0),
        Commands::Destroy {
            stack,
            file,
            state_dir,
            timeout,
        } => cmd_destroy(&file, &state_dir, &stack, timeout).map(|()| 0),
        Commands::Status { stack, state_dir } => cmd_status(&state_dir, stack.as_deref()).map(|()| 0),
        Commands::History { stack, state_dir } => cmd_history(&state_dir, &stack).map(|()| 0),
        Commands::Unlock { stack, state_dir } => cmd_unlock(&state_dir, &stack).map(|()| 0),
    }
}

/// Stack names from the command line end up in paths under the state dir.
fn check_stack(stack: &str) -> Result<(), String> {
    state::check_stack_name(stack).map_err(|e| e.to_string())
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("terrace.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let project = stacks::notisce_project();
    let yaml = serde_yaml_ng::to_string(&project)
        .map_err(|e| format!("cannot encode project: {}", e))?;
    std::fs::write(&config_path, yaml)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized {} project at {}", project.name, path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    for name in project.stacks.keys() {
        println!("  Stack:   {}", name);
    }
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let project = parse_and_validate(file)?;
    let resources: usize = project.stacks.values().map(|s| s.resources.len()).sum();
    println!(
        "OK: {} ({} stacks, {} resources)",
        project.name,
        project.stacks.len(),
        resources
    );
    Ok(())
}

/// Parse and validate a project file, printing every validation error.
fn parse_and_validate(file: &Path) -> Result<ProjectConfig, String> {
    let project = parser::parse_project_file(file)?;
    let errors = parser::validate_project(&project);
    if errors.is_empty() {
        return Ok(project);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

/// Plan `stack` against its recorded state.
fn stack_plan(project: &ProjectConfig, state_dir: &Path, stack: &str) -> Result<ChangePlan, String> {
    let graph = build_stack(project, stack).map_err(|e| e.to_string())?;
    let prior = state::load_record(state_dir, stack).map_err(|e| e.to_string())?;
    planner::plan(&graph, prior.as_ref()).map_err(|e| e.to_string())
}

fn cmd_plan(file: &Path, state_dir: &Path, stack: &str, json: bool) -> Result<i32, String> {
    check_stack(stack)?;
    let project = parse_and_validate(file)?;
    let plan = stack_plan(&project, state_dir, stack)?;

    if json {
        let text = serde_json::to_string_pretty(&plan)
            .map_err(|e| format!("cannot encode plan: {}", e))?;
        println!("{}", text);
    } else {
        print_plan(&plan);
    }

    Ok(if plan.is_empty() { 0 } else { EXIT_CHANGES_PENDING })
}

fn action_symbol(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::Create => "+",
        ChangeAction::Update => "~",
        ChangeAction::Delete => "-",
    }
}

/// Display a plan to stdout.
fn print_plan(plan: &ChangePlan) {
    println!("Planning: {} ({} ops)", plan.stack, plan.ops.len());
    println!();
    for op in &plan.ops {
        println!("  {} {} ({})", action_symbol(op.action), op.id, op.kind);
    }
    if !plan.is_empty() {
        println!();
    }
    println!(
        "Plan: {} to add, {} to change, {} to destroy.",
        plan.count(ChangeAction::Create),
        plan.count(ChangeAction::Update),
        plan.count(ChangeAction::Delete)
    );
}

fn cancel_signal(timeout: Option<u64>) -> CancelSignal {
    match timeout {
        Some(secs) => CancelSignal::with_timeout(Duration::from_secs(secs)),
        None => CancelSignal::new(),
    }
}

/// Run `plan` against the local cloud under `state_dir`.
fn run_plan(
    plan: &ChangePlan,
    state_dir: &Path,
    env: Environment,
    policy: &Policy,
    timeout: Option<u64>,
) -> Result<ExecutionResult, String> {
    let cloud = LocalCloud::new(state_dir, env);
    let store = FileStateStore::new(state_dir);
    let cancel = cancel_signal(timeout);
    let cfg = ApplyConfig {
        adapter: &cloud,
        store: &store,
        policy,
        cancel: &cancel,
    };
    executor::apply(&cfg, plan).map_err(|e| e.to_string())
}

fn report(verb: &str, result: &ExecutionResult) -> Result<(), String> {
    println!(
        "{}: {} applied, {} skipped ({:.1}s)",
        result.stack,
        result.ops_applied,
        result.ops_skipped,
        result.total_duration.as_secs_f64()
    );
    if result.is_success() {
        println!("{} complete.", verb);
        return Ok(());
    }
    Err(format!("{} of '{}' {}", verb.to_lowercase(), result.stack, result.status))
}

fn cmd_apply(file: &Path, state_dir: &Path, stack: &str, timeout: Option<u64>) -> Result<(), String> {
    check_stack(stack)?;
    let project = parse_and_validate(file)?;
    let plan = stack_plan(&project, state_dir, stack)?;
    if plan.is_empty() {
        println!("{}: up to date.", stack);
        return Ok(());
    }
    print_plan(&plan);
    println!();
    let result = run_plan(&plan, state_dir, project.env.clone(), &project.policy, timeout)?;
    report("Apply", &result)
}

fn cmd_destroy(file: &Path, state_dir: &Path, stack: &str, timeout: Option<u64>) -> Result<(), String> {
    check_stack(stack)?;
    let Some(prior) = state::load_record(state_dir, stack).map_err(|e| e.to_string())? else {
        println!("{}: no state recorded, nothing to destroy.", stack);
        return Ok(());
    };

    let (env, policy) = if file.exists() {
        let project = parse_and_validate(file)?;
        (project.env, project.policy)
    } else {
        log::debug!("{} not found, using default env and policy", file.display());
        (Environment::default(), Policy::default())
    };

    let plan = planner::plan_destroy(&prior).map_err(|e| e.to_string())?;
    if plan.is_empty() {
        println!("{}: nothing to destroy.", stack);
        return Ok(());
    }
    print_plan(&plan);
    println!();
    let result = run_plan(&plan, state_dir, env, &policy, timeout)?;
    report("Destroy", &result)
}

fn cmd_status(state_dir: &Path, stack: Option<&str>) -> Result<(), String> {
    let store = FileStateStore::new(state_dir);
    let names = match stack {
        Some(name) => {
            check_stack(name)?;
            vec![name.to_string()]
        }
        None => store.stacks().map_err(|e| e.to_string())?,
    };

    let mut found = false;
    for name in &names {
        let Some(record) = store.load(name).map_err(|e| e.to_string())? else {
            continue;
        };
        found = true;
        println!("Stack: {} [{}]", record.stack, record.status);
        println!("  Generated: {}", record.generated_at);
        println!("  Generator: {}", record.generator);
        if let Some(fp) = &record.plan_fingerprint {
            println!("  Plan:      {}", fp);
        }
        println!("  Resources: {}", record.nodes.len());
        for (id, node) in &record.nodes {
            println!("    {}: {} [{}]", id, node.live_id, node.kind);
        }
    }

    if !found {
        println!("No state found. Run `terrace apply <stack>` first.");
    }
    Ok(())
}

/// One-line rendering of a provenance event.
fn describe_event(event: &ProvenanceEvent) -> String {
    match event {
        ProvenanceEvent::ApplyStarted {
            run_id,
            plan_fingerprint,
            ops,
            ..
        } => format!("run {} started: {} ops (plan {})", run_id, ops, plan_fingerprint),
        ProvenanceEvent::OpStarted {
            index,
            resource,
            action,
            ..
        } => format!("[{}] {} {}", index, action, resource),
        ProvenanceEvent::OpSucceeded {
            index,
            resource,
            live_id,
            attempts,
            duration_seconds,
            ..
        } => format!(
            "[{}] {} ok: {} ({} attempt(s), {:.2}s)",
            index, resource, live_id, attempts, duration_seconds
        ),
        ProvenanceEvent::OpSkipped { index, resource, .. } => {
            format!("[{}] {} skipped", index, resource)
        }
        ProvenanceEvent::OpFailed {
            index,
            resource,
            attempts,
            error,
            ..
        } => format!("[{}] {} FAILED after {} attempt(s): {}", index, resource, attempts, error),
        ProvenanceEvent::ApplyCompleted {
            run_id,
            ops_applied,
            ops_skipped,
            ops_failed,
            total_seconds,
            ..
        } => format!(
            "run {} finished: {} applied, {} skipped, {} failed ({:.1}s)",
            run_id, ops_applied, ops_skipped, ops_failed, total_seconds
        ),
    }
}

fn cmd_history(state_dir: &Path, stack: &str) -> Result<(), String> {
    check_stack(stack)?;
    let store = FileStateStore::new(state_dir);
    let events = store.history(stack).map_err(|e| e.to_string())?;
    if events.is_empty() {
        println!("No history for {}.", stack);
        return Ok(());
    }
    for te in &events {
        println!("{}  {}", te.ts, describe_event(&te.event));
    }
    Ok(())
}

fn cmd_unlock(state_dir: &Path, stack: &str) -> Result<(), String> {
    check_stack(stack)?;
    let store = FileStateStore::new(state_dir);
    if store.force_unlock(stack).map_err(|e| e.to_string())? {
        println!("{}: lease removed.", stack);
    } else {
        println!("{}: not locked.", stack);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunStatus;

    /// Initialized project in a fresh tempdir; returns (dir, file, state_dir).
    fn project_dir() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let file = dir.path().join("terrace.yaml");
        let state_dir = dir.path().join("state");
        (dir, file, state_dir)
    }

    #[test]
    fn test_tr017_init() {
        let (_dir, file, state_dir) = project_dir();
        assert!(file.exists());
        assert!(state_dir.is_dir());
        let project = parser::parse_project_file(&file).unwrap();
        assert_eq!(project, stacks::notisce_project());
    }

    #[test]
    fn test_tr017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("terrace.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_tr017_validate_valid() {
        let (_dir, file, _) = project_dir();
        assert!(cmd_validate(&file).is_ok());
    }

    #[test]
    fn test_tr017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("terrace.yaml");
        std::fs::write(
            &file,
            r#"
version: "2.0"
name: broken
stacks:
  s:
    resources:
      - id: a
        kind: network
        properties: { cidr: 10.0.0.0/16 }
        depends_on: [ghost]
"#,
        )
        .unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_tr017_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_validate(&dir.path().join("nope.yaml")).is_err());
    }

    #[test]
    fn test_tr017_plan_exit_codes() {
        let (_dir, file, state_dir) = project_dir();
        assert_eq!(
            cmd_plan(&file, &state_dir, stacks::DATASOURCE, false).unwrap(),
            EXIT_CHANGES_PENDING
        );
        cmd_apply(&file, &state_dir, stacks::DATASOURCE, None).unwrap();
        assert_eq!(cmd_plan(&file, &state_dir, stacks::DATASOURCE, false).unwrap(), 0);
        assert_eq!(cmd_plan(&file, &state_dir, stacks::DATASOURCE, true).unwrap(), 0);
    }

    #[test]
    fn test_tr017_plan_unknown_stack() {
        let (_dir, file, state_dir) = project_dir();
        let err = cmd_plan(&file, &state_dir, "ghost", false).unwrap_err();
        assert!(err.contains("unknown stack 'ghost'"));
    }

    #[test]
    fn test_tr017_apply_writes_state_and_cloud() {
        let (_dir, file, state_dir) = project_dir();
        cmd_apply(&file, &state_dir, stacks::RESTAPI, None).unwrap();

        let record = state::load_record(&state_dir, stacks::RESTAPI).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert!(record.nodes.contains_key("subscribe"));
        assert!(state_dir.join(".cloud/function/subscribe.json").exists());

        // Second apply is a no-op.
        cmd_apply(&file, &state_dir, stacks::RESTAPI, None).unwrap();
        let again = state::load_record(&state_dir, stacks::RESTAPI).unwrap().unwrap();
        assert_eq!(again.nodes, record.nodes);
    }

    #[test]
    fn test_tr017_apply_zero_timeout_fails() {
        let (_dir, file, state_dir) = project_dir();
        let err = cmd_apply(&file, &state_dir, stacks::CLUSTER, Some(0)).unwrap_err();
        assert!(err.contains("PARTIALLY-FAILED-AT-OP-0"), "got: {}", err);
        let record = state::load_record(&state_dir, stacks::CLUSTER).unwrap().unwrap();
        assert!(matches!(record.status, RunStatus::PartiallyFailed { op_index: 0, .. }));

        // A later run without deadline finishes the stack.
        cmd_apply(&file, &state_dir, stacks::CLUSTER, None).unwrap();
        let record = state::load_record(&state_dir, stacks::CLUSTER).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(record.nodes.len(), 4);
    }

    #[test]
    fn test_tr017_destroy_retains_table() {
        let (_dir, file, state_dir) = project_dir();
        cmd_apply(&file, &state_dir, stacks::DATASOURCE, None).unwrap();
        cmd_destroy(&file, &state_dir, stacks::DATASOURCE, None).unwrap();

        let record = state::load_record(&state_dir, stacks::DATASOURCE).unwrap().unwrap();
        assert!(record.nodes.is_empty());
        assert!(!state_dir.join(".cloud/table/notisce-main.json").exists());
        assert!(state_dir
            .join(".cloud/orphaned/table/notisce-main.json")
            .exists());
    }

    #[test]
    fn test_tr017_destroy_without_state() {
        let (_dir, file, state_dir) = project_dir();
        assert!(cmd_destroy(&file, &state_dir, stacks::CLUSTER, None).is_ok());
    }

    #[test]
    fn test_tr017_destroy_without_project_file() {
        let (dir, file, state_dir) = project_dir();
        cmd_apply(&file, &state_dir, stacks::RESTAPI, None).unwrap();
        let missing = dir.path().join("gone.yaml");
        cmd_destroy(&missing, &state_dir, stacks::RESTAPI, None).unwrap();
        let record = state::load_record(&state_dir, stacks::RESTAPI).unwrap().unwrap();
        assert!(record.nodes.is_empty());
    }

    #[test]
    fn test_tr017_status_and_history() {
        let (_dir, file, state_dir) = project_dir();
        assert!(cmd_status(&state_dir, None).is_ok());
        assert!(cmd_history(&state_dir, stacks::DATASOURCE).is_ok());

        cmd_apply(&file, &state_dir, stacks::DATASOURCE, None).unwrap();
        assert!(cmd_status(&state_dir, None).is_ok());
        assert!(cmd_status(&state_dir, Some(stacks::DATASOURCE)).is_ok());
        assert!(cmd_history(&state_dir, stacks::DATASOURCE).is_ok());

        let events = FileStateStore::new(&state_dir)
            .history(stacks::DATASOURCE)
            .unwrap();
        assert!(matches!(
            events.first().map(|e| &e.event),
            Some(ProvenanceEvent::ApplyStarted { .. })
        ));
        assert!(matches!(
            events.last().map(|e| &e.event),
            Some(ProvenanceEvent::ApplyCompleted { ops_failed: 0, .. })
        ));
    }

    #[test]
    fn test_tr017_stack_names_outside_state_dir_rejected() {
        let (dir, file, state_dir) = project_dir();
        let escape = "../escape";
        assert!(cmd_plan(&file, &state_dir, escape, false)
            .unwrap_err()
            .contains("invalid stack name"));
        assert!(cmd_apply(&file, &state_dir, escape, None).is_err());
        assert!(cmd_destroy(&file, &state_dir, escape, None).is_err());
        assert!(cmd_status(&state_dir, Some(escape)).is_err());
        assert!(cmd_history(&state_dir, escape).is_err());
        assert!(cmd_unlock(&state_dir, escape).is_err());
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_tr017_unlock_after_crash() {
        let (_dir, file, state_dir) = project_dir();
        let store = FileStateStore::new(&state_dir);
        std::mem::forget(store.lock(stacks::DATASOURCE).unwrap());
        let err = cmd_apply(&file, &state_dir, stacks::DATASOURCE, None).unwrap_err();
        assert!(err.contains("locked"), "got: {}", err);

        cmd_unlock(&state_dir, stacks::DATASOURCE).unwrap();
        assert!(!state::lease_file_path(&state_dir, stacks::DATASOURCE).exists());
        cmd_apply(&file, &state_dir, stacks::DATASOURCE, None).unwrap();
        // Unlocking a free stack is fine.
        cmd_unlock(&state_dir, stacks::DATASOURCE).unwrap();
    }

    #[test]
    fn test_tr017_action_symbols() {
        assert_eq!(action_symbol(ChangeAction::Create), "+");
        assert_eq!(action_symbol(ChangeAction::Update), "~");
        assert_eq!(action_symbol(ChangeAction::Delete), "-");
    }

    #[test]
    fn test_tr017_describe_failure_event() {
        let text = describe_event(&ProvenanceEvent::OpFailed {
            stack: "s".into(),
            index: 3,
            resource: "chart".into(),
            attempts: 2,
            error: "throttled".into(),
        });
        assert_eq!(text, "[3] chart FAILED after 2 attempt(s): throttled");
    }

    #[test]
    fn test_tr017_dispatch_plan_and_apply() {
        let (_dir, file, state_dir) = project_dir();
        let plan = Commands::Plan {
            stack: stacks::DATASOURCE.to_string(),
            file: file.clone(),
            state_dir: state_dir.clone(),
            json: true,
        };
        assert_eq!(dispatch(plan).unwrap(), EXIT_CHANGES_PENDING);
        let apply = Commands::Apply {
            stack: stacks::DATASOURCE.to_string(),
            file,
            state_dir: state_dir.clone(),
            timeout: None,
        };
        assert_eq!(dispatch(apply).unwrap(), 0);
        let status = Commands::Status {
            stack: None,
            state_dir,
        };
        assert_eq!(dispatch(status).unwrap(), 0);
    }
}
