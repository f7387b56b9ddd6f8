pub mod mock_lsp;
pub mod test_utils;
