//! コマンド実行: ビルトイン判定、リダイレクト適用、パイプライン接続、ジョブ制御。
//!
//! ## ディスパッチ
//!
//! - 単一コマンド・フォアグラウンド・リダイレクトなしのビルトイン
//!   → fork なしでシェルプロセス内で実行（[`builtins::try_exec`]）
//! - それ以外（外部コマンド、パイプライン、リダイレクト付き/`&` 付きビルトイン）
//!   → [`execute_job`] で fork。ビルトインも子プロセス側で実行されるため、
//!   配線済みの fd を継承しつつシェル本体の状態には影響しない
//!
//! ## パイプライン実行
//!
//! 1. N-1 個のパイプを作成
//! 2. 各コマンドを fork。子は [`spawn::child_setup`] でプロセスグループ参加・
//!    シグナルリセット・fd 配線を済ませてから `execvp`（失敗時は診断 + 127）
//! 3. 親側でも `setpgid` を呼び、子が先に exec するレースを塞ぐ
//! 4. 消費したパイプ fd とリダイレクト fd は親側で即座に閉じる
//!    （閉じ漏れはパイプの EOF 伝播を止める）
//! 5. ジョブテーブルに登録。background なら `[N] pgid` を表示して即座に返り、
//!    foreground なら `tcsetpgrp` でターミナルを渡して同期待機する
//!
//! fork や open の途中失敗時は作成済みの fd をすべて閉じて行を放棄する。
//! 起動済みの子はパイプの EOF / SIGPIPE で自然に終了し、プロンプト前の
//! reap で回収される（ブロックして待つことはしない）。

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;

use crate::builtins;
use crate::expand;
use crate::job;
use crate::parser::{self, Pipeline};
use crate::shell::Shell;
use crate::spawn;

/// 単一パイプラインを実行し、終了ステータスを返す。
///
/// `cmd_text` は元の入力行で、ジョブテーブルの表示用に使う。
pub fn execute(shell: &mut Shell, pipeline: &Pipeline<'_>, cmd_text: &str) -> i32 {
    // 実行前に状態変化を取り込む（`jobs` / `fg` / `bg` が古い状態を見ないように）
    job::reap_pending(&mut shell.jobs);

    // 単一ビルトイン（フォアグラウンド・リダイレクトなし）→ fork なしの高速パス
    if pipeline.commands.len() == 1 && !pipeline.background {
        let cmd = &pipeline.commands[0];
        if cmd.infile.is_none() && cmd.outfile.is_none() {
            let args: Vec<&str> = cmd.argv.iter().map(|a| a.as_ref()).collect();
            if let Some(status) = builtins::try_exec(shell, &args, &mut io::stdout()) {
                return status;
            }
        }
    }

    execute_job(shell, pipeline, cmd_text)
}

// ── リダイレクト fd ─────────────────────────────────────────────────

/// `infile` を読み取り用に開いて raw fd を返す。閉じる責任は呼び出し側。
fn open_infile(path: &str) -> Result<i32, i32> {
    File::open(path)
        .map(|f| f.into_raw_fd())
        .map_err(|e| {
            eprintln!("myshell: {}: {}", path, e);
            1
        })
}

/// `outfile` を `O_CREAT | (append ? O_APPEND : O_TRUNC)`、モード 0644 で開く。
fn open_outfile(path: &str, append: bool) -> Result<i32, i32> {
    let mut opts = OpenOptions::new();
    opts.create(true).write(true).mode(0o644);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    opts.open(path)
        .map(|f| f.into_raw_fd())
        .map_err(|e| {
            eprintln!("myshell: {}: {}", path, e);
            1
        })
}

// ── パイプライン実行 ────────────────────────────────────────────────

/// パイプライン（単一 or 複数コマンド）を子プロセス群として起動する。
fn execute_job(shell: &mut Shell, pipeline: &Pipeline<'_>, cmd_text: &str) -> i32 {
    let n = pipeline.commands.len();
    let pipe_count = n - 1;

    // ── パイプ作成 ──
    let mut pipes: Vec<[i32; 2]> = vec![[-1, -1]; pipe_count];
    for p in pipes.iter_mut() {
        if unsafe { libc::pipe(p.as_mut_ptr()) } != 0 {
            eprintln!("myshell: pipe: {}", io::Error::last_os_error());
            close_all_pipes(&mut pipes);
            return 1;
        }
    }

    let mut pids: Vec<libc::pid_t> = Vec::with_capacity(n);
    let mut pgid: libc::pid_t = 0;
    let mut error_status: Option<i32> = None;

    for (i, cmd) in pipeline.commands.iter().enumerate() {
        // stdin: パイプ > infile > (background 先頭は /dev/null) > 継承
        let mut infile_fd: Option<i32> = None;
        let stdin_fd = if i > 0 {
            Some(pipes[i - 1][0])
        } else if let Some(path) = &cmd.infile {
            match open_infile(path) {
                Ok(fd) => {
                    infile_fd = Some(fd);
                    Some(fd)
                }
                Err(status) => {
                    error_status = Some(status);
                    break;
                }
            }
        } else if pipeline.background {
            // バックグラウンドジョブにターミナル入力を奪わせない（SIGTTIN 防止）
            match open_infile("/dev/null") {
                Ok(fd) => {
                    infile_fd = Some(fd);
                    Some(fd)
                }
                Err(status) => {
                    error_status = Some(status);
                    break;
                }
            }
        } else {
            None
        };

        // stdout: パイプ > outfile > 継承
        let mut outfile_fd: Option<i32> = None;
        let stdout_fd = if i < pipe_count {
            Some(pipes[i][1])
        } else if let Some(path) = &cmd.outfile {
            match open_outfile(path, cmd.append) {
                Ok(fd) => {
                    outfile_fd = Some(fd);
                    Some(fd)
                }
                Err(status) => {
                    if let Some(fd) = infile_fd {
                        unsafe { libc::close(fd) };
                    }
                    error_status = Some(status);
                    break;
                }
            }
        } else {
            None
        };

        // 子プロセスで閉じるべき残りのパイプ端
        let mut close_fds: Vec<i32> = Vec::with_capacity(pipe_count * 2);
        for p in pipes.iter() {
            for &fd in p {
                if fd >= 0 && Some(fd) != stdin_fd && Some(fd) != stdout_fd {
                    close_fds.push(fd);
                }
            }
        }

        match spawn::fork() {
            Ok(0) => {
                // ── 子プロセス ──
                spawn::child_setup(pgid, stdin_fd, stdout_fd, &close_fds);
                let args: Vec<&str> = cmd.argv.iter().map(|a| a.as_ref()).collect();
                if builtins::is_builtin(args[0]) {
                    let mut out = io::stdout();
                    let status = builtins::try_exec(shell, &args, &mut out).unwrap_or(1);
                    let _ = out.flush();
                    unsafe { libc::_exit(status) }
                }
                spawn::exec_or_die(&args);
            }
            Ok(child_pid) => {
                // ── 親プロセス ──
                if pgid == 0 {
                    pgid = child_pid;
                }
                // 子側の setpgid と二重だが、exec 先行のレースを塞ぐため両方で呼ぶ
                unsafe {
                    libc::setpgid(child_pid, pgid);
                }
                pids.push(child_pid);
            }
            Err(e) => {
                eprintln!("myshell: fork: {}", e);
                if let Some(fd) = infile_fd {
                    unsafe { libc::close(fd) };
                }
                if let Some(fd) = outfile_fd {
                    unsafe { libc::close(fd) };
                }
                error_status = Some(1);
                break;
            }
        }

        // 消費したパイプ端とリダイレクト fd を親側で閉じる
        if i > 0 {
            unsafe { libc::close(pipes[i - 1][0]) };
            pipes[i - 1][0] = -1;
        }
        if i < pipe_count {
            unsafe { libc::close(pipes[i][1]) };
            pipes[i][1] = -1;
        }
        if let Some(fd) = infile_fd {
            unsafe { libc::close(fd) };
        }
        if let Some(fd) = outfile_fd {
            unsafe { libc::close(fd) };
        }
    }

    // 未消費のパイプ端を閉じる（エラー中断時はここで EOF が伝播し、
    // 起動済みの子は自然に終了してプロンプト前の reap で回収される）
    close_all_pipes(&mut pipes);

    if let Some(status) = error_status {
        // 起動済みの子はジョブとして登録しない。パイプの EOF / SIGPIPE で
        // 自然に終了し、プロンプト前の waitpid(-1) で回収される。
        return status;
    }

    let display = display_cmdline(cmd_text);
    let id = shell.jobs.register(pgid, display, pids);

    if pipeline.background {
        eprintln!("[{}] {}", id, pgid);
        0
    } else {
        job::set_foreground_pgrp(shell.terminal_fd, pgid);
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
                // フォアグラウンド完了分は待機直後に取り除く
                shell.jobs.remove(id);
                status
            }
        }
    }
}

/// ジョブテーブル表示用に末尾の `&` を除いたコマンド文字列を作る。
fn display_cmdline(cmd_text: &str) -> String {
    cmd_text
        .trim()
        .strip_suffix('&')
        .unwrap_or(cmd_text)
        .trim()
        .to_string()
}

/// まだ開いているパイプ端をすべて閉じる。
fn close_all_pipes(pipes: &mut [[i32; 2]]) {
    for p in pipes.iter_mut() {
        for fd in p.iter_mut() {
            if *fd >= 0 {
                unsafe { libc::close(*fd) };
                *fd = -1;
            }
        }
    }
}

// ── コマンド置換 ────────────────────────────────────────────────────

/// コマンド文字列を子インタプリタで実行し、stdout の出力を取得する。
///
/// [`expand`](crate::expand) のコマンド置換（`$(...)` / `` `...` ``）から
/// 呼ばれる。子プロセス側で展開 → パース → 実行を行い、親はパイプから
/// 出力を読み取る。失敗はすべて空文字列への展開として扱い、終了ステータスは
/// 伝播しない。末尾の改行は除去する。
pub fn execute_capture(cmd_str: &str, shell: &mut Shell) -> String {
    let mut pipefd = [0i32; 2];
    if unsafe { libc::pipe(pipefd.as_mut_ptr()) } != 0 {
        return String::new();
    }

    let pid = match spawn::fork() {
        Ok(pid) => pid,
        Err(_) => {
            unsafe {
                libc::close(pipefd[0]);
                libc::close(pipefd[1]);
            }
            return String::new();
        }
    };

    if pid == 0 {
        // 子プロセス: stdout をパイプに接続して 1 行分の処理を実行
        unsafe {
            libc::close(pipefd[0]);
            libc::dup2(pipefd[1], libc::STDOUT_FILENO);
            libc::close(pipefd[1]);
        }
        let expanded = expand::expand(cmd_str, shell);
        match parser::parse(&expanded) {
            Ok(Some(pipeline)) => {
                let status = execute(shell, &pipeline, cmd_str);
                let _ = io::stdout().flush();
                std::process::exit(status);
            }
            _ => std::process::exit(1),
        }
    }

    // 親プロセス: パイプから出力を読み取り
    unsafe { libc::close(pipefd[1]) };
    let mut output = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let nread = unsafe {
            libc::read(
                pipefd[0],
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if nread <= 0 {
            break;
        }
        output.extend_from_slice(&buf[..nread as usize]);
    }
    unsafe { libc::close(pipefd[0]) };

    let mut status = 0i32;
    unsafe { libc::waitpid(pid, &mut status, 0) };

    String::from_utf8_lossy(&output)
        .trim_end_matches('\n')
        .to_string()
}
