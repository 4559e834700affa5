//! fork + execvp による子プロセス起動ヘルパー。
//!
//! パイプライン実行の子プロセス側セットアップをここに集約する:
//!
//! | 関数 | 役割 |
//! |------|------|
//! | [`fork`] | `libc::fork` の薄いラッパー（失敗を `io::Error` で返す） |
//! | [`child_setup`] | プロセスグループ参加、シグナルリセット、fd 配線（子側でのみ呼ぶ） |
//! | [`exec_or_die`] | `execvp` 実行。失敗時は診断を書いて `_exit(127)` |
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//!
//! プロセスグループへの参加は子側の `setpgid(0, pgid)` と親側の
//! `setpgid(child, pgid)`（[`executor`](crate::executor)）の両方で行う。
//! 子が先に `exec` してしまうレースを塞ぐための二重化であり、冗長なのは意図。

use std::ffi::CString;

/// `fork(2)` を呼ぶ。失敗時は `io::Error`。
///
/// 戻り値 0 は子プロセス側。子側では速やかに [`child_setup`] →
/// [`exec_or_die`]（または `_exit`）へ進むこと。
pub fn fork() -> std::io::Result<libc::pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(pid)
    }
}

/// 子プロセス側の共通セットアップ。fork 直後の子でのみ呼ぶ。
///
/// 1. `setpgid(0, pgid)` — `pgid == 0` なら自分の PID でグループリーダーになる
/// 2. シェルが無視/ハンドルしているシグナルをデフォルトに戻す
/// 3. stdin / stdout を指定 fd に `dup2` し、複製元を閉じる
/// 4. 残りのパイプ fd をすべて閉じる
pub fn child_setup(
    pgid: libc::pid_t,
    stdin_fd: Option<i32>,
    stdout_fd: Option<i32>,
    fds_to_close: &[i32],
) {
    unsafe {
        libc::setpgid(0, pgid);

        libc::signal(libc::SIGINT, libc::SIG_DFL);
        libc::signal(libc::SIGQUIT, libc::SIG_DFL);
        libc::signal(libc::SIGTSTP, libc::SIG_DFL);
        libc::signal(libc::SIGTTIN, libc::SIG_DFL);
        libc::signal(libc::SIGTTOU, libc::SIG_DFL);
        libc::signal(libc::SIGCHLD, libc::SIG_DFL);

        if let Some(fd) = stdin_fd {
            if fd != libc::STDIN_FILENO {
                libc::dup2(fd, libc::STDIN_FILENO);
                libc::close(fd);
            }
        }
        if let Some(fd) = stdout_fd {
            if fd != libc::STDOUT_FILENO {
                libc::dup2(fd, libc::STDOUT_FILENO);
                libc::close(fd);
            }
        }

        for &fd in fds_to_close {
            // dup2 の複製元は閉じ済み
            if Some(fd) != stdin_fd && Some(fd) != stdout_fd {
                libc::close(fd);
            }
        }
    }
}

/// `execvp` でコマンドに置き換わる。戻ってきたら失敗なので診断を書いて `_exit(127)`。
pub fn exec_or_die(argv: &[&str]) -> ! {
    let command = argv.first().copied().unwrap_or("");
    let cargv = CStringVec::from_args(argv);
    unsafe {
        libc::execvp(cargv.as_ptr().read(), cargv.as_ptr());
    }

    let err = std::io::Error::last_os_error();
    let msg = match err.raw_os_error() {
        Some(libc::ENOENT) => "command not found".to_string(),
        Some(libc::EACCES) => "permission denied".to_string(),
        _ => err.to_string(),
    };
    eprintln!("myshell: {}: {}", command, msg);
    unsafe { libc::_exit(127) }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
pub struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl CStringVec {
    /// 引数リストから構築する。各要素を `CString` に変換し、NULL 終端ポインタ配列を作る。
    /// 内部 NUL を含む引数は空文字列に落ちる（execvp に渡せないため）。
    pub fn from_args(args: &[&str]) -> Self {
        let strings: Vec<CString> = args
            .iter()
            .map(|s| CString::new(*s).unwrap_or_default())
            .collect();
        let mut ptrs: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Self {
            _strings: strings,
            ptrs,
        }
    }

    /// NULL 終端ポインタ配列の先頭を返す。
    pub fn as_ptr(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cstringvec_is_null_terminated() {
        let v = CStringVec::from_args(&["echo", "hello"]);
        unsafe {
            assert!(!v.as_ptr().read().is_null());
            assert!(!v.as_ptr().add(1).read().is_null());
            assert!(v.as_ptr().add(2).read().is_null());
        }
    }

    #[test]
    fn cstringvec_preserves_contents() {
        let v = CStringVec::from_args(&["ls", "-l"]);
        unsafe {
            let first = std::ffi::CStr::from_ptr(v.as_ptr().read());
            assert_eq!(first.to_str().unwrap(), "ls");
        }
    }

    #[test]
    fn interior_nul_becomes_empty() {
        let v = CStringVec::from_args(&["a\0b"]);
        unsafe {
            let first = std::ffi::CStr::from_ptr(v.as_ptr().read());
            assert_eq!(first.to_str().unwrap(), "");
        }
    }
}
