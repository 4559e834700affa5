//! ビルトインコマンドの実装。
//!
//! `try_exec()` が `Some(status)` を返せばビルトインとして処理済み、
//! `None` なら外部コマンドとして executor に委ねる。
//!
//! 出力は `out` シンク経由で書く。単一・フォアグラウンド・リダイレクトなしの
//! 呼び出しではシェルプロセス内で `stdout` に直接書き、リダイレクトや
//! パイプが付く場合は fork された子プロセス内で配線済みの fd に書く
//! （[`executor`](crate::executor) 側のディスパッチ）。
//!
//! | コマンド | 動作 |
//! |----------|------|
//! | `cd [dir]` | ディレクトリ変更。引数省略時は `$HOME` |
//! | `exit [code]` | シェル終了（デフォルト 0） |
//! | `history` | 履歴を 1 始まりの番号付きで表示 |
//! | `jobs` | ジョブテーブルを表示 |
//! | `fg [%id\|id]` | ジョブをフォアグラウンドで再開。省略時は最新ジョブ |
//! | `bg [%id\|id]` | ジョブをバックグラウンドで再開。省略時は最新ジョブ |
//! | `kill [-SIG] pid\|%id` | シグナル送信（デフォルト SIGTERM、`%id` はグループ宛） |
//! | `echo [args...]` | 引数を空白 1 個区切りで出力 + 改行 |
//! | `pwd` / `mkdir dir` / `touch file` | システムコールの薄いラッパー |

use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::job;
use crate::shell::Shell;

/// `cmd` がビルトイン名かどうか。
pub fn is_builtin(cmd: &str) -> bool {
    matches!(
        cmd,
        "cd" | "exit" | "history" | "jobs" | "fg" | "bg" | "kill" | "echo" | "pwd" | "mkdir"
            | "touch"
    )
}

/// ビルトインコマンドの実行を試みる。
///
/// 戻り値:
/// - `Some(status)` — ビルトインとして実行済み
/// - `None` — 該当するビルトインなし（外部コマンドとして実行すべき）
pub fn try_exec(shell: &mut Shell, args: &[&str], out: &mut impl Write) -> Option<i32> {
    match args[0] {
        "cd" => Some(builtin_cd(args)),
        "exit" => Some(builtin_exit(shell, args)),
        "history" => Some(builtin_history(shell, out)),
        "jobs" => Some(builtin_jobs(shell, out)),
        "fg" => Some(builtin_fg(shell, args)),
        "bg" => Some(builtin_bg(shell, args)),
        "kill" => Some(builtin_kill(shell, args)),
        "echo" => Some(builtin_echo(args, out)),
        "pwd" => Some(builtin_pwd(out)),
        "mkdir" => Some(builtin_mkdir(args)),
        "touch" => Some(builtin_touch(args)),
        _ => None,
    }
}

/// `cd [dir]` — カレントディレクトリを変更する。引数省略時は `$HOME` に移動。
fn builtin_cd(args: &[&str]) -> i32 {
    let target = if args.len() > 1 {
        args[1].to_string()
    } else {
        match env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("myshell: cd: HOME not set");
                return 1;
            }
        }
    };

    if let Err(e) = env::set_current_dir(Path::new(&target)) {
        eprintln!("myshell: cd: {}: {}", target, e);
        1
    } else {
        0
    }
}

/// `exit [code]` — シェルを終了する。code 省略時は 0。
fn builtin_exit(shell: &mut Shell, args: &[&str]) -> i32 {
    shell.should_exit = true;
    let code = if args.len() > 1 {
        args[1].parse::<i32>().unwrap_or_else(|_| {
            eprintln!("myshell: exit: {}: numeric argument required", args[1]);
            2
        })
    } else {
        0
    };
    shell.exit_code = code;
    code
}

/// `history` — 履歴を 1 始まりの番号付きで表示する。
fn builtin_history(shell: &Shell, out: &mut impl Write) -> i32 {
    for (i, line) in shell.history.list() {
        let _ = writeln!(out, "{:4}  {}", i, line);
    }
    0
}

/// `jobs` — ジョブテーブルを ID 昇順で表示する。
fn builtin_jobs(shell: &Shell, out: &mut impl Write) -> i32 {
    for j in shell.jobs.iter() {
        let _ = writeln!(out, "[{}] {}  {}  {}", j.id, j.pgid, j.status(), j.cmdline);
    }
    0
}

// ── ジョブ制御ビルトイン ────────────────────────────────────────────

/// `fg` / `bg` / `kill` のジョブ指定（`%id` または `id`）を解決する。
/// 引数がなければ最新の生きているジョブ。見つからなければエラーを報告して `None`。
fn resolve_job_id(shell: &Shell, name: &'static str, args: &[&str]) -> Option<usize> {
    if args.len() > 1 {
        let id_str = args[1].strip_prefix('%').unwrap_or(args[1]);
        match id_str.parse::<usize>() {
            Ok(id) if shell.jobs.get(id).is_some() => Some(id),
            _ => {
                eprintln!("myshell: {}: job not found: {}", name, args[1]);
                None
            }
        }
    } else {
        match shell.jobs.latest_live() {
            Some(id) => Some(id),
            None => {
                eprintln!("myshell: {}: no current job", name);
                None
            }
        }
    }
}

/// `fg [%id|id]` — ジョブを SIGCONT で再開し、フォアグラウンドで待機する。
///
/// 待機と停止処理は新規フォアグラウンドパイプラインとまったく同じ:
/// ターミナルを渡して [`job::wait_foreground`]、停止なら Stopped 報告、
/// 完了ならテーブルから削除、どの経路でもターミナルをシェルに戻す。
fn builtin_fg(shell: &mut Shell, args: &[&str]) -> i32 {
    let id = match resolve_job_id(shell, "fg", args) {
        Some(id) => id,
        None => return 1,
    };

    let pgid = match shell.jobs.get_mut(id) {
        Some(j) => {
            // 停止マークを先に消す。残っていると待機が即座に Suspended を返す
            j.mark_resumed();
            j.pgid
        }
        None => return 1,
    };

    job::set_foreground_pgrp(shell.terminal_fd, pgid);
    if unsafe { libc::kill(-pgid, libc::SIGCONT) } < 0 {
        eprintln!("myshell: fg: {}", std::io::Error::last_os_error());
    }

    let outcome = job::wait_foreground(&mut shell.jobs, pgid);
    job::set_foreground_pgrp(shell.terminal_fd, shell.shell_pgid);

    match outcome {
        job::FgWait::Suspended => {
            if let Some(j) = shell.jobs.get(id) {
                eprintln!("\n[{}]+  Stopped   {}", id, j.cmdline);
            }
            128 + libc::SIGTSTP
        }
        job::FgWait::Finished(status) => {
            shell.jobs.remove(id);
            status
        }
    }
}

/// `bg [%id|id]` — ジョブを SIGCONT で再開し、バックグラウンドのまま続行させる。
fn builtin_bg(shell: &mut Shell, args: &[&str]) -> i32 {
    let id = match resolve_job_id(shell, "bg", args) {
        Some(id) => id,
        None => return 1,
    };

    let Some(j) = shell.jobs.get_mut(id) else {
        return 1;
    };
    j.mark_resumed();
    if unsafe { libc::kill(-j.pgid, libc::SIGCONT) } < 0 {
        eprintln!("myshell: bg: {}", std::io::Error::last_os_error());
        return 1;
    }
    0
}

/// `kill [-SIG] pid|%id` — シグナルを送る。SIG は数値指定、デフォルト SIGTERM。
/// `%id` はジョブのプロセスグループ全体に送る。
fn builtin_kill(shell: &mut Shell, args: &[&str]) -> i32 {
    if args.len() < 2 {
        eprintln!("myshell: kill: usage: kill [-SIG] pid | %id");
        return 2;
    }

    let mut sig = libc::SIGTERM;
    let mut target = args[1];
    if let Some(num) = target.strip_prefix('-') {
        match num.parse::<i32>() {
            Ok(n) => sig = n,
            Err(_) => {
                eprintln!("myshell: kill: invalid signal: {}", target);
                return 1;
            }
        }
        match args.get(2) {
            Some(&t) => target = t,
            None => {
                eprintln!("myshell: kill: missing target");
                return 2;
            }
        }
    }

    let dest = if let Some(jobspec) = target.strip_prefix('%') {
        let id = match jobspec.parse::<usize>() {
            Ok(id) => id,
            Err(_) => {
                eprintln!("myshell: kill: no such job: {}", target);
                return 1;
            }
        };
        match shell.jobs.get(id) {
            Some(j) => -j.pgid, // ジョブはグループ全体に送る
            None => {
                eprintln!("myshell: kill: no such job: {}", target);
                return 1;
            }
        }
    } else {
        match target.parse::<libc::pid_t>() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                eprintln!("myshell: kill: invalid pid: {}", target);
                return 1;
            }
        }
    };

    if unsafe { libc::kill(dest, sig) } < 0 {
        eprintln!("myshell: kill: {}", std::io::Error::last_os_error());
        return 1;
    }
    0
}

// ── 出力系・雑多なビルトイン ────────────────────────────────────────

/// `echo [args...]` — 引数を空白 1 個で連結して出力し、改行を付ける。
fn builtin_echo(args: &[&str], out: &mut impl Write) -> i32 {
    let _ = writeln!(out, "{}", args[1..].join(" "));
    0
}

/// `pwd` — カレントディレクトリを表示する。
fn builtin_pwd(out: &mut impl Write) -> i32 {
    match env::current_dir() {
        Ok(dir) => {
            let _ = writeln!(out, "{}", dir.display());
            0
        }
        Err(e) => {
            eprintln!("myshell: pwd: {}", e);
            1
        }
    }
}

/// `mkdir dir` — ディレクトリを作成する。
fn builtin_mkdir(args: &[&str]) -> i32 {
    let Some(dir) = args.get(1) else {
        eprintln!("myshell: mkdir: missing operand");
        return 1;
    };
    match fs::create_dir(dir) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("myshell: mkdir: {}: {}", dir, e);
            1
        }
    }
}

/// `touch file` — ファイルを作成する（既存ならそのまま）。
fn builtin_touch(args: &[&str]) -> i32 {
    let Some(file) = args.get(1) else {
        eprintln!("myshell: touch: missing operand");
        return 1;
    };
    match fs::OpenOptions::new().create(true).write(true).open(file) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("myshell: touch: {}: {}", file, e);
            1
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
