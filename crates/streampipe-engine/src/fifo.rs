use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Créer le pipe nommé en mode 0644, après avoir supprimé un résidu éventuel
/// d'un run précédent
pub fn create_fifo(path: &Path) -> io::Result<()> {
    remove_fifo(path);

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "fifo path contains NUL"))?;

    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Supprimer le pipe nommé, sans erreur s'il n'existe plus
pub fn remove_fifo(path: &Path) {
    let _ = std::fs::remove_file(path);
}
