//! シェルのシグナル設定と SIGCHLD の self-pipe。
//!
//! シェル本体は対話シグナル（SIGINT, SIGQUIT, SIGTSTP, SIGTTIN, SIGTTOU）を
//! 無視する。子プロセスは [`spawn`](crate::spawn) がデフォルトに戻す。
//!
//! ## SIGCHLD の扱い
//!
//! ハンドラはジョブテーブルに一切触れない。非ブロッキングパイプに 1 バイト
//! 書くだけで（errno は保存・復元）、reap と状態更新はメインループが
//! プロンプト表示前に [`drain`] → [`job::reap_pending`](crate::job::reap_pending)
//! の順で通常コンテキストから行う。ハンドラ内での割り当て・stdio 呼び出しは
//! 発生しない。
//!
//! ハンドラは `sigaction` で `SA_RESTART | SA_NOCLDSTOP` を指定して
//! インストールする。フォアグラウンドの停止は同期 `waitpid(WUNTRACED)` が、
//! バックグラウンドの停止はプロンプト時の `WNOHANG | WUNTRACED` drain が拾う。

use std::sync::atomic::{AtomicI32, Ordering};

/// self-pipe の読み取り側 fd。未初期化は -1。
static PIPE_READ: AtomicI32 = AtomicI32::new(-1);
/// self-pipe の書き込み側 fd。未初期化は -1。
static PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

#[cfg(target_os = "linux")]
fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(not(target_os = "linux"))]
fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

/// SIGCHLD ハンドラ。1 バイト書くだけ（パイプが満杯なら既に通知済みなので無視）。
extern "C" fn on_sigchld(_signo: libc::c_int) {
    unsafe {
        let saved_errno = *errno_location();
        let fd = PIPE_WRITE.load(Ordering::Relaxed);
        if fd >= 0 {
            let byte = 1u8;
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
        *errno_location() = saved_errno;
    }
}

/// fd に O_NONBLOCK と FD_CLOEXEC を設定する。
fn set_nonblock_cloexec(fd: i32) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
    }
}

/// シェルのシグナル設定を行う。起動時に 1 回だけ呼ぶ。
///
/// 1. 対話シグナルを無視（ターミナル制御操作でシェル自身が停止しないように）
/// 2. self-pipe を作成（非ブロッキング + CLOEXEC）
/// 3. SIGCHLD ハンドラを `SA_RESTART | SA_NOCLDSTOP` でインストール
pub fn install() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
        libc::signal(libc::SIGQUIT, libc::SIG_IGN);
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGTTIN, libc::SIG_IGN);
        libc::signal(libc::SIGTTOU, libc::SIG_IGN);

        let mut fds = [0i32; 2];
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            // パイプが作れなくても reap はプロンプトごとに走るので続行できる
            eprintln!("myshell: pipe: {}", std::io::Error::last_os_error());
            return;
        }
        set_nonblock_cloexec(fds[0]);
        set_nonblock_cloexec(fds[1]);
        PIPE_READ.store(fds[0], Ordering::Relaxed);
        PIPE_WRITE.store(fds[1], Ordering::Relaxed);

        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_sigchld as libc::sighandler_t;
        sa.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut());
    }
}

/// self-pipe に溜まった通知バイトを読み捨てる。
///
/// メインループがプロンプト表示前に呼ぶ。戻り値は通知があったかどうか
/// （reap 自体は通知の有無にかかわらず毎イテレーション行われる）。
pub fn drain() -> bool {
    let fd = PIPE_READ.load(Ordering::Relaxed);
    if fd < 0 {
        return false;
    }
    let mut any = false;
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        any = true;
    }
    any
}
