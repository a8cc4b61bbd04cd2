//! Shell completion scripts
//!
//! The bash and zsh scripts complete contact names for `get` and `delete`
//! by calling back into `contacts names <prefix>`. Other shells get clap's
//! generated script, which covers commands and flags only.

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::Cli;

const BIN: &str = "contacts";
const COMMANDS: &str = "init auth sync list get delete logout completions help";

pub fn print(shell: Shell) -> Result<()> {
    let mut out = io::stdout().lock();
    match script(shell) {
        Some(script) => out.write_all(script.as_bytes())?,
        None => generate(shell, &mut Cli::command(), BIN, &mut out),
    }
    Ok(())
}

fn script(shell: Shell) -> Option<String> {
    match shell {
        Shell::Bash => Some(format!(
            r#"# bash completion for {bin}
_{bin}() {{
  local cur="${{COMP_WORDS[COMP_CWORD]}}"
  if [ "$COMP_CWORD" -eq 1 ]; then
    COMPREPLY=($(compgen -W "{commands}" -- "$cur"))
    return
  fi
  case "${{COMP_WORDS[1]}}" in
    get|delete)
      local IFS=$'\n'
      COMPREPLY=($({bin} names "$cur" 2>/dev/null))
      ;;
  esac
}}
complete -F _{bin} {bin}
"#,
            bin = BIN,
            commands = COMMANDS
        )),
        Shell::Zsh => Some(format!(
            r#"#compdef {bin}
_{bin}() {{
  if (( CURRENT == 2 )); then
    compadd -- {commands}
  elif [[ $words[2] == get || $words[2] == delete ]]; then
    local -a names
    names=("${{(@f)$({bin} names "$PREFIX" 2>/dev/null)}}")
    compadd -a names
  fi
}}
compdef _{bin} {bin}
"#,
            bin = BIN,
            commands = COMMANDS
        )),
        _ => None,
    }
}
