use utils::text::escape_single_quotes;

/// Prologue of the navigator envelope: sets the autonomous-operator frame.
const NAVIGATOR_PROLOGUE: &str = "You are working autonomously inside a disposable sandbox on a \
fresh clone of the repository. Explore the codebase as needed, then carry out the task below \
end to end without asking for confirmation.\n\nTask:\n";

/// Epilogue: instructs the model to commit (and open a PR when possible).
const NAVIGATOR_EPILOGUE: &str = "\n\nWhen the change is complete, run the project's tests if \
any are present, then commit your work with a descriptive message. If a remote is configured, \
push the branch and open a pull request.";

pub fn navigator_envelope(prompt: &str) -> String {
    format!("{NAVIGATOR_PROLOGUE}{prompt}{NAVIGATOR_EPILOGUE}")
}

/// The model invocation run inside the container. Only single quotes in
/// the prompt are shell-escaped; output is newline-delimited JSON.
pub fn build_model_command(prompt: &str, navigator_enabled: bool) -> String {
    let wrapped = if navigator_enabled {
        navigator_envelope(prompt)
    } else {
        prompt.to_string()
    };
    let escaped = escape_single_quotes(&wrapped);
    format!(
        "cd /workspace/repo && claude -p '{escaped}' --verbose --output-format stream-json \
         --dangerously-skip-permissions"
    )
}

/// Workspace setup: a shallow clone of the repo at the requested branch
/// (or the project default), then the optional dependency install.
pub fn build_setup_command(
    repo_url: &str,
    branch: Option<&str>,
    default_branch: &str,
    setup_script: Option<&str>,
) -> String {
    let branch = branch.unwrap_or(default_branch);
    let mut command = format!(
        "git clone --depth 1 --branch '{}' '{}' /workspace/repo",
        escape_single_quotes(branch),
        escape_single_quotes(repo_url),
    );
    if let Some(script) = setup_script {
        command.push_str(" && cd /workspace/repo && ");
        command.push_str(script);
    }
    command
}
