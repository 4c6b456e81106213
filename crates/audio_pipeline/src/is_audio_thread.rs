thread_local! {
    static IS_AUDIO_THREAD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

pub(crate) fn is_audio_thread() -> bool {
    IS_AUDIO_THREAD.with(|x| x.get())
}

/// Mark this thread as being an audio thread for the duration of `f`, restoring the previous marking afterward.
///
/// `process_frame_and_tasks` calls this around everything it does while holding the pipeline mutex, since hooks called
/// from there may run on what is, from the embedder's perspective, the real audio thread.
pub(crate) fn with_audio_thread_marked<R>(f: impl FnOnce() -> R) -> R {
    let previous = IS_AUDIO_THREAD.with(|x| x.replace(true));
    let result = f();
    IS_AUDIO_THREAD.with(|x| x.set(previous));
    result
}
