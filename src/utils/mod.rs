mod display;

pub use display::{
    print_banner, print_status, print_thread_menu, print_timing, print_transcript, prompt, Tone,
};
