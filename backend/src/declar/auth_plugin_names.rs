pub const MY_SQL_NATIVE_PASSWORD: &str = "mysql_native_password";
