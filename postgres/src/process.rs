use std::process::Stdio;

use config::shared::PrivilegesConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecutorError;
use crate::executor::PrivilegedCommand;

/// Builds the argv actually spawned for `command`.
///
/// With sudo enabled the command is wrapped as `sudo --preserve-env=K,... -u <user> <argv>`.
/// Values travel through the process environment only, never through the command line.
pub(crate) fn wrap_argv(privileges: &PrivilegesConfig, command: &PrivilegedCommand) -> Vec<String> {
    if !privileges.use_sudo {
        return command.argv.clone();
    }

    let mut argv = vec!["sudo".to_string()];
    if !command.envs.is_empty() {
        let names: Vec<&str> = command.envs.iter().map(|(key, _)| key.as_str()).collect();
        argv.push(format!("--preserve-env={}", names.join(",")));
    }
    argv.extend(["-u".to_string(), privileges.os_user.clone()]);
    argv.extend(command.argv.iter().cloned());

    argv
}

/// Spawns `command` and waits for it to exit.
pub(crate) async fn run(
    privileges: &PrivilegesConfig,
    command: &PrivilegedCommand,
) -> Result<(), ExecutorError> {
    let argv = wrap_argv(privileges, command);
    let Some((program, args)) = argv.split_first() else {
        return Err(ExecutorError::Spawn {
            argv: command.argv.clone(),
            source: std::io::Error::other("empty command line"),
        });
    };

    let env_names: Vec<&str> = command.envs.iter().map(|(key, _)| key.as_str()).collect();
    debug!(command = %command.display(), envs = ?env_names, "running privileged command");

    let mut process = Command::new(program);
    process
        .args(args)
        .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true);
    if let Some(dir) = &command.current_dir {
        process.current_dir(dir);
    }
    if command.suppress_output {
        process.stdout(Stdio::null()).stderr(Stdio::null());
    }
    process.stdin(if command.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = process.spawn().map_err(|source| ExecutorError::Spawn {
        argv: command.argv.clone(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
        stdin.write_all(input.as_bytes()).await?;
        // Dropping the handle closes the pipe so the child sees end of input.
        drop(stdin);
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(ExecutorError::Process {
            argv: command.argv.clone(),
            exit_code: status.code(),
        });
    }

    Ok(())
}
