use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "en")]
    English,
}

impl Language {
    pub const fn code(self) -> &'static str {
        match self {
            Language::Russian => "ru",
            Language::English => "en",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "ru" => Some(Language::Russian),
            "en" => Some(Language::English),
            _ => None,
        }
    }
}

/// User-facing strings in the configured language.
#[derive(Debug, Clone, Copy)]
pub struct I18n {
    language: Language,
}

impl I18n {
    #[must_use]
    pub const fn new(language: Language) -> Self {
        Self { language }
    }

    fn pick<'a>(self, russian: &'a str, english: &'a str) -> &'a str {
        match self.language {
            Language::Russian => russian,
            Language::English => english,
        }
    }

    pub fn release_label(self, prerelease: bool) -> &'static str {
        if prerelease { "beta" } else { "stable" }
    }

    pub fn releases_loading(self) -> &'static str {
        self.pick(
            "Загрузка списка релизов из GitHub...",
            "Downloading release list from GitHub...",
        )
    }

    pub fn releases_loaded(self, count: usize) -> String {
        match self.language {
            Language::Russian => format!("Загружено релизов: {count}"),
            Language::English => format!("Releases loaded: {count}"),
        }
    }

    pub fn releases_fetch_failed(self, err: &str) -> String {
        match self.language {
            Language::Russian => format!("Не удалось получить список релизов: {err}"),
            Language::English => format!("Failed to get release list: {err}"),
        }
    }

    pub fn release_list_empty(self) -> &'static str {
        self.pick(
            "Список релизов пуст. Обновите список.",
            "Release list is empty. Refresh the list.",
        )
    }

    pub fn no_beta_found(self) -> &'static str {
        self.pick("Бета-версий не найдено.", "No beta versions found.")
    }

    pub fn release_chosen(self, tag: &str, name: &str, prerelease: bool) -> String {
        match self.language {
            Language::Russian => {
                format!("Выбран релиз: tag={tag} name={name} prerelease={prerelease}")
            }
            Language::English => {
                format!("Selected release: tag={tag} name={name} prerelease={prerelease}")
            }
        }
    }

    pub fn no_firmware_files(self) -> &'static str {
        self.pick(
            "В релизе нет файлов прошивки.",
            "This release has no firmware files.",
        )
    }

    pub fn no_bin_files(self) -> &'static str {
        self.pick(
            "В релизе нет .bin файлов прошивки.",
            "No .bin firmware files found in this release.",
        )
    }

    pub fn asset_not_found(self, name: &str) -> String {
        match self.language {
            Language::Russian => format!("Файл прошивки {name} не найден в релизе."),
            Language::English => format!("Firmware file {name} is not part of this release."),
        }
    }

    pub fn select_asset_prompt(self) -> &'static str {
        self.pick(
            "Выберите файл прошивки (.bin), подходящий вашему устройству:",
            "Select a firmware (.bin) file suitable for your device:",
        )
    }

    pub fn where_to_save_firmware(self) -> &'static str {
        self.pick("Куда сохранить прошивку", "Where to save firmware")
    }

    pub fn where_to_save_backup(self) -> &'static str {
        self.pick("Сохранить бэкап", "Save backup")
    }

    pub fn downloading_firmware(self, tag: &str, asset: &str) -> String {
        match self.language {
            Language::Russian => format!("Скачивание прошивки {tag} ({asset})..."),
            Language::English => format!("Downloading firmware {tag} ({asset})..."),
        }
    }

    pub fn firmware_saved(self, path: &str) -> String {
        match self.language {
            Language::Russian => format!("Прошивка сохранена: {path}"),
            Language::English => format!("Firmware saved to: {path}"),
        }
    }

    pub fn download_failed(self, err: &str) -> String {
        match self.language {
            Language::Russian => format!("Не удалось скачать прошивку: {err}"),
            Language::English => format!("Failed to download firmware: {err}"),
        }
    }

    pub fn device_not_found(self) -> &'static str {
        self.pick(
            "ESP32 устройство не найдено (COM порт).",
            "ESP32 device not found (COM port).",
        )
    }

    pub fn select_port_prompt(self) -> &'static str {
        self.pick("COM порт:", "COM port:")
    }

    pub fn invalid_choice(self) -> &'static str {
        self.pick("Неверный выбор.", "Invalid choice.")
    }

    pub fn confirm_flash(self, tag: &str, port: &str, erase: bool) -> String {
        match self.language {
            Language::Russian => format!(
                "Прошить релиз {tag} на {port}? Стирание флеша: {}",
                if erase { "да" } else { "нет" }
            ),
            Language::English => format!(
                "Flash release {tag} to {port}? Erase flash: {}",
                if erase { "yes" } else { "no" }
            ),
        }
    }

    pub fn confirm_restore(self, port: &str) -> String {
        match self.language {
            Language::Russian => format!(
                "Перезаписать флеш устройства {port} содержимым бэкапа? Действие нельзя отменить."
            ),
            Language::English => {
                format!("Overwrite device {port} flash with backup contents? This action cannot be undone.")
            }
        }
    }

    pub fn yes_no_suffix(self) -> &'static str {
        self.pick("[д/Н]", "[y/N]")
    }

    pub fn is_yes(self, answer: &str) -> bool {
        matches!(
            answer.trim().to_lowercase().as_str(),
            "y" | "yes" | "д" | "да"
        )
    }

    pub fn aborted(self) -> &'static str {
        self.pick("Отменено.", "Cancelled.")
    }

    pub fn starting_flash(self, port: &str, erase: bool) -> String {
        match self.language {
            Language::Russian => format!("Запуск прошивки на {port} (erase_flash={erase})..."),
            Language::English => format!("Starting flashing on {port} (erase_flash={erase})..."),
        }
    }

    pub fn connecting(self) -> &'static str {
        self.pick("Подключение к устройству...", "Connecting to device...")
    }

    pub fn erasing_flash(self) -> &'static str {
        self.pick(
            "Стирание флеша (erase_flash)...",
            "Erasing flash (erase_flash)...",
        )
    }

    pub fn erase_failed_cancelled(self) -> &'static str {
        self.pick(
            "Стирание флеша завершилось с ошибкой, прошивка отменена.",
            "Flash erase finished with error, flashing cancelled.",
        )
    }

    pub fn writing_firmware(self) -> &'static str {
        self.pick("Запись прошивки во флеш...", "Writing firmware to flash...")
    }

    pub fn flash_succeeded(self) -> &'static str {
        self.pick(
            "Прошивка завершена успешно.",
            "Flashing completed successfully.",
        )
    }

    pub fn flash_failed(self, code: i32) -> String {
        match self.language {
            Language::Russian => format!("Ошибка прошивки, код {code}"),
            Language::English => format!("Flashing error, code {code}"),
        }
    }

    pub fn detecting_flash_size(self) -> &'static str {
        self.pick(
            "Определение размера флеша (flash_id)...",
            "Detecting flash size (flash_id)...",
        )
    }

    pub fn flash_size_fallback(self, size: u64) -> String {
        match self.language {
            Language::Russian => {
                format!("Не удалось определить размер флеша, используется {size} байт")
            }
            Language::English => {
                format!("Could not detect flash size, using {size} bytes")
            }
        }
    }

    pub fn creating_backup(self, port: &str, size: u64) -> String {
        match self.language {
            Language::Russian => {
                format!("Создание ПОЛНОГО бэкапа с устройства {port} (объём {size} байт)...")
            }
            Language::English => {
                format!("Creating FULL backup from device {port} (size {size} bytes)...")
            }
        }
    }

    pub fn reading_flash(self) -> &'static str {
        self.pick("Чтение флеша устройства...", "Reading device flash...")
    }

    pub fn backup_succeeded(self) -> &'static str {
        self.pick("Бэкап успешно создан.", "Backup created successfully.")
    }

    pub fn backup_failed(self, code: i32) -> String {
        match self.language {
            Language::Russian => format!("Ошибка бэкапа, код {code}"),
            Language::English => format!("Backup error, code {code}"),
        }
    }

    pub fn restoring_backup(self, port: &str) -> String {
        match self.language {
            Language::Russian => format!("Восстановление бэкапа на {port}..."),
            Language::English => format!("Restoring backup to {port}..."),
        }
    }

    pub fn restore_succeeded(self) -> &'static str {
        self.pick(
            "Бэкап успешно восстановлен.",
            "Backup restored successfully.",
        )
    }

    pub fn restore_failed(self, code: i32) -> String {
        match self.language {
            Language::Russian => format!("Ошибка восстановления, код {code}"),
            Language::English => format!("Restore error, code {code}"),
        }
    }

    pub fn tool_start_failed(self, err: &str) -> String {
        match self.language {
            Language::Russian => format!("Ошибка запуска esptool: {err}"),
            Language::English => format!("Error starting esptool: {err}"),
        }
    }

    pub fn port_busy(self, port: &str) -> String {
        match self.language {
            Language::Russian => format!("Порт {port} уже занят другой операцией."),
            Language::English => format!("Port {port} is already used by another job."),
        }
    }

    pub fn settings_saved(self) -> &'static str {
        self.pick("Настройки сохранены.", "Settings saved.")
    }

    pub fn settings_file(self, path: &str) -> String {
        match self.language {
            Language::Russian => format!("Файл настроек: {path}"),
            Language::English => format!("Settings file: {path}"),
        }
    }

    pub fn no_ports(self) -> &'static str {
        self.pick("Последовательные порты не найдены.", "No serial ports found.")
    }

    pub fn console_opened(self, port: &str, baud: u32) -> String {
        match self.language {
            Language::Russian => format!(
                "Порт {port} открыт ({baud} бод). Вводите команды, Ctrl-D для выхода."
            ),
            Language::English => format!(
                "Port {port} opened ({baud} baud). Type commands, Ctrl-D to exit."
            ),
        }
    }

    pub fn console_closed(self) -> &'static str {
        self.pick("Порт закрыт.", "Port closed.")
    }

    pub fn port_open_failed(self, err: &str) -> String {
        match self.language {
            Language::Russian => format!("Ошибка открытия порта: {err}"),
            Language::English => format!("Port open error: {err}"),
        }
    }

    pub fn error_text(self, err: &str) -> String {
        match self.language {
            Language::Russian => format!("Ошибка: {err}"),
            Language::English => format!("Error: {err}"),
        }
    }

    pub fn send_failed(self) -> &'static str {
        self.pick("Не удалось отправить команду.", "Failed to send command.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_codes() {
        assert_eq!(Language::from_code("ru"), Some(Language::Russian));
        assert_eq!(Language::from_code(" EN "), Some(Language::English));
        assert_eq!(Language::from_code("uk"), None);
    }

    #[test]
    fn serializes_as_short_codes() {
        assert_eq!(
            serde_json::to_string(&Language::English).unwrap(),
            "\"en\""
        );
        let parsed: Language = serde_json::from_str("\"ru\"").unwrap();
        assert_eq!(parsed, Language::Russian);
    }

    #[test]
    fn picks_strings_per_language() {
        assert_eq!(
            I18n::new(Language::English).no_beta_found(),
            "No beta versions found."
        );
        assert_eq!(
            I18n::new(Language::Russian).no_beta_found(),
            "Бета-версий не найдено."
        );
        assert_eq!(
            I18n::new(Language::English).flash_failed(2),
            "Flashing error, code 2"
        );
    }

    #[test]
    fn accepts_yes_in_both_languages() {
        let i18n = I18n::new(Language::English);
        assert!(i18n.is_yes("Y"));
        assert!(i18n.is_yes("да"));
        assert!(!i18n.is_yes(""));
        assert!(!i18n.is_yes("no"));
    }
}
