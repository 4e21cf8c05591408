pub mod render_pass;
pub mod subpass;
