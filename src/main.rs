//! myshell — POSIX ジョブ制御付きの対話型シェル
//!
//! REPL ループ: reap → 完了通知 → プロンプト表示 → 入力読み取り → 履歴保存
//! → 展開 → パース → 実行 → ループ
//!
//! 現在の機能:
//! - 行編集: raw モード、カーソル移動、↑↓ 履歴呼び出し（[`editor`]）
//! - 展開: `$VAR` / `${VAR}` / `$(...)` / `` `...` ``、クォート規則（[`expand`]）
//! - 構文解析: パイプライン、リダイレクト、クォート、`&`（[`parser`]）
//! - コマンド実行: パイプライン接続、プロセスグループ管理（[`executor`]）
//! - ジョブコントロール: `&`、Ctrl+Z サスペンド、`fg`/`bg`/`kill` 復帰（[`job`]）
//! - 履歴: `~/.myshell_history` 永続化（[`history`]）

mod builtins;
mod editor;
mod executor;
mod expand;
mod history;
mod job;
mod parser;
mod shell;
mod signal;
mod spawn;

use editor::LineEditor;
use shell::Shell;

fn main() {
    // シグナル設定: シェル自体は対話シグナルを無視し、SIGCHLD は self-pipe で受ける。
    // 子プロセスは spawn::child_setup で SIG_DFL にリセットされる。
    signal::install();

    // シェルを自身のプロセスグループリーダーにし、ターミナルを掌握する。
    // tcsetpgrp は SIGTTOU を発生させうるので、無視設定の後で行う。
    unsafe {
        let shell_pid = libc::getpid();
        libc::setpgid(shell_pid, shell_pid);
        libc::tcsetpgrp(libc::STDIN_FILENO, shell_pid);
    }

    let mut shell = Shell::new();
    let mut editor = LineEditor::new();

    loop {
        // プロンプト前に SIGCHLD 通知を drain し、バックグラウンドジョブを
        // reap して完了通知を出力する（通知は行編集の途中には割り込まない）
        signal::drain();
        job::reap_pending(&mut shell.jobs);
        job::report_finished(&mut shell.jobs);

        let line = match editor.read_line("myshell$ ", &shell.history) {
            Some(line) => line,
            None => {
                // EOF (Ctrl+D): 改行を出力して正常終了
                println!();
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        shell.history.append(line);

        // 展開 → パース → 実行。エラーは行を放棄してプロンプトに戻る
        let expanded = expand::expand(line, &mut shell);
        match parser::parse(&expanded) {
            Ok(Some(pipeline)) => {
                executor::execute(&mut shell, &pipeline, line);
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("myshell: {}", e);
            }
        }

        if shell.should_exit {
            break;
        }
    }

    std::process::exit(shell.exit_code);
}
