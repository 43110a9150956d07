pub mod cleanup;
pub mod supabase;

pub mod util {
    pub mod env;
}
